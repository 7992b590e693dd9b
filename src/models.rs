//! Core data models shared across the cluster.
//!
//! These types represent users, credentials, documents, jobs, and chunks as
//! they flow between the gateway, the document service, the vector service,
//! and the ingestion workers.

use serde::{Deserialize, Serialize};

/// Account role. Admin-only operations revalidate this against the database
/// on every request, not just the token claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A registered account. `password_hash` is an argon2 PHC string and never
/// leaves the identity layer.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub organization: Option<String>,
    pub role: Role,
    pub disabled: bool,
    pub email_verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Server-side record of an issued refresh token. Only the SHA-256 hash of
/// the token is stored; lookup is by hash.
#[derive(Debug, Clone)]
pub struct RefreshCredential {
    pub token_hash: String,
    pub user_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Long-lived programmatic credential. The plaintext (prefix + secret) is
/// returned once at creation; only its hash is stored.
#[derive(Debug, Clone)]
pub struct ApiCredential {
    pub id: String,
    pub key_hash: String,
    pub user_id: String,
    pub label: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub disabled: bool,
}

/// A parsed, persisted research paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub owner_id: String,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub sections: serde_json::Value,
    pub tables: serde_json::Value,
    pub figures: serde_json::Value,
    pub references: serde_json::Value,
    pub ocr_applied: bool,
    pub page_count: i64,
    pub batch_id: Option<String>,
    pub uploaded_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Durable record of one background processing unit.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub batch_id: Option<String>,
    pub filename: String,
    pub size_bytes: i64,
    pub status: JobStatus,
    pub progress: i64,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub owner_id: String,
    pub document_id: Option<i64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<StepStatus> {
        match s {
            "started" => Some(StepStatus::Started),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only audit entry for one pipeline step of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStep {
    pub job_id: String,
    pub step_index: i64,
    pub step_name: String,
    pub status: StepStatus,
    pub message: String,
    pub detail: serde_json::Value,
    pub duration_ms: i64,
    pub created_at: i64,
}

/// What a chunk's text span represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Heading,
    Caption,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Heading => "heading",
            ChunkKind::Caption => "caption",
        }
    }

    pub fn parse(s: &str) -> Option<ChunkKind> {
        match s {
            "text" => Some(ChunkKind::Text),
            "heading" => Some(ChunkKind::Heading),
            "caption" => Some(ChunkKind::Caption),
            _ => None,
        }
    }
}

/// A bounded span of document text. Indices are contiguous from 0 within
/// the owning document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: i64,
    pub chunk_index: i64,
    pub text: String,
    pub section: Option<String>,
    pub page: Option<i64>,
    pub kind: ChunkKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_roundtrip() {
        for s in ["pending", "processing", "completed", "failed", "cancelled"] {
            assert_eq!(JobStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(JobStatus::parse("queued").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn role_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert!(Role::parse("root").is_none());
    }
}
