//! Processing-job records and their step audit log.
//!
//! Jobs move `pending → processing → {completed, failed}` with cancellation
//! allowed from the two non-terminal states. Transitions are guarded in SQL
//! so only legal moves take effect regardless of caller interleaving; the
//! owning worker is the only writer of terminal states, while the gateway
//! path may only set the advisory `cancelled`.
//!
//! Steps are append-only: each insert takes the next index for its job and
//! rows are never updated afterwards.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Job, JobStatus, JobStep, StepStatus};

const JOB_COLUMNS: &str = "id, batch_id, filename, size_bytes, status, progress, error, created_at, started_at, completed_at, owner_id, document_id, metadata_json";

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Job {
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    Job {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        filename: row.get("filename"),
        size_bytes: row.get("size_bytes"),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        progress: row.get("progress"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        owner_id: row.get("owner_id"),
        document_id: row.get("document_id"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
    }
}

pub async fn create(
    pool: &SqlitePool,
    owner_id: &str,
    filename: &str,
    size_bytes: i64,
    batch_id: Option<&str>,
    metadata: serde_json::Value,
) -> Result<Job> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO jobs (id, batch_id, filename, size_bytes, status, progress, created_at, owner_id, metadata_json)
        VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(batch_id)
    .bind(filename)
    .bind(size_bytes)
    .bind(now)
    .bind(owner_id)
    .bind(metadata.to_string())
    .execute(pool)
    .await?;

    find(pool, &id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job row missing immediately after insert"))
}

pub async fn find(pool: &SqlitePool, id: &str) -> Result<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(job_from_row))
}

pub async fn list_for_owner(
    pool: &SqlitePool,
    owner_id: &str,
    status: Option<JobStatus>,
    skip: i64,
    limit: i64,
) -> Result<Vec<Job>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = ? AND status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ))
            .bind(owner_id)
            .bind(status.as_str())
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ))
            .bind(owner_id)
            .bind(limit)
            .bind(skip)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(job_from_row).collect())
}

/// pending → processing. Re-claiming a job already in `processing` (crashed
/// owner, broker redelivery) succeeds without touching `started_at`.
pub async fn mark_processing(pool: &SqlitePool, id: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'processing', started_at = COALESCE(started_at, ?)
        WHERE id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Progress only moves forward, and only while the job is live.
pub async fn set_progress(pool: &SqlitePool, id: &str, progress: i64) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET progress = ? WHERE id = ? AND status = 'processing' AND progress < ?",
    )
    .bind(progress)
    .bind(id)
    .bind(progress)
    .execute(pool)
    .await?;
    Ok(())
}

/// processing → completed. Completion requires the produced document id.
pub async fn complete(pool: &SqlitePool, id: &str, document_id: i64) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed', progress = 100, completed_at = ?, document_id = ?, error = NULL
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(now)
    .bind(document_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record the produced document on a live job before completion, so a
/// redelivered job can pick up where the dead worker stopped.
pub async fn attach_document(pool: &SqlitePool, id: &str, document_id: i64) -> Result<()> {
    sqlx::query("UPDATE jobs SET document_id = ? WHERE id = ? AND status = 'processing'")
        .bind(document_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// {pending, processing} → failed.
pub async fn fail(pool: &SqlitePool, id: &str, error: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed', progress = 100, completed_at = ?, error = ?
        WHERE id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(now)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Advisory cancellation; legal only from non-terminal states. The worker
/// observes it at its next step boundary.
pub async fn cancel(pool: &SqlitePool, id: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'cancelled', completed_at = ?
        WHERE id = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ============ Step audit log ============

/// Append a step record, taking the next index for the job.
pub async fn record_step(
    pool: &SqlitePool,
    job_id: &str,
    step_name: &str,
    status: StepStatus,
    message: &str,
    detail: serde_json::Value,
    duration_ms: i64,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO job_steps (job_id, step_index, step_name, status, message, detail_json, duration_ms, created_at)
        SELECT ?, COALESCE(MAX(step_index) + 1, 0), ?, ?, ?, ?, ?, ?
        FROM job_steps WHERE job_id = ?
        "#,
    )
    .bind(job_id)
    .bind(step_name)
    .bind(status.as_str())
    .bind(message)
    .bind(detail.to_string())
    .bind(duration_ms)
    .bind(now)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn steps(pool: &SqlitePool, job_id: &str) -> Result<Vec<JobStep>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, step_index, step_name, status, message, detail_json, duration_ms, created_at
        FROM job_steps WHERE job_id = ? ORDER BY step_index ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let status: String = row.get("status");
            let detail_json: String = row.get("detail_json");
            JobStep {
                job_id: row.get("job_id"),
                step_index: row.get("step_index"),
                step_name: row.get("step_name"),
                status: StepStatus::parse(&status).unwrap_or(StepStatus::Failed),
                message: row.get("message"),
                detail: serde_json::from_str(&detail_json).unwrap_or(serde_json::json!({})),
                duration_ms: row.get("duration_ms"),
                created_at: row.get("created_at"),
            }
        })
        .collect())
}

// ============ Batches ============

/// Aggregate view of one batch's child jobs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub status: JobStatus,
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub created_at: i64,
}

fn derive_batch_status(summary: &BatchSummary) -> JobStatus {
    if summary.processing > 0 {
        JobStatus::Processing
    } else if summary.pending > 0 {
        if summary.completed + summary.failed + summary.cancelled > 0 {
            JobStatus::Processing
        } else {
            JobStatus::Pending
        }
    } else if summary.failed > 0 {
        JobStatus::Failed
    } else if summary.completed > 0 {
        JobStatus::Completed
    } else {
        JobStatus::Cancelled
    }
}

fn batch_from_row(row: &sqlx::sqlite::SqliteRow) -> BatchSummary {
    let mut summary = BatchSummary {
        batch_id: row.get("batch_id"),
        status: JobStatus::Pending,
        total: row.get("total"),
        pending: row.get("pending"),
        processing: row.get("processing"),
        completed: row.get("completed"),
        failed: row.get("failed"),
        cancelled: row.get("cancelled"),
        created_at: row.get("created_at"),
    };
    summary.status = derive_batch_status(&summary);
    summary
}

const BATCH_AGGREGATE: &str = r#"
    SELECT batch_id,
           COUNT(*) AS total,
           SUM(status = 'pending') AS pending,
           SUM(status = 'processing') AS processing,
           SUM(status = 'completed') AS completed,
           SUM(status = 'failed') AS failed,
           SUM(status = 'cancelled') AS cancelled,
           MIN(created_at) AS created_at
    FROM jobs
    WHERE batch_id IS NOT NULL AND owner_id = ?
"#;

pub async fn list_batches(pool: &SqlitePool, owner_id: &str) -> Result<Vec<BatchSummary>> {
    let rows = sqlx::query(&format!(
        "{BATCH_AGGREGATE} GROUP BY batch_id ORDER BY created_at DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(batch_from_row).collect())
}

pub async fn find_batch(
    pool: &SqlitePool,
    owner_id: &str,
    batch_id: &str,
) -> Result<Option<BatchSummary>> {
    let row = sqlx::query(&format!("{BATCH_AGGREGATE} AND batch_id = ? GROUP BY batch_id"))
        .bind(owner_id)
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(batch_from_row))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pending: i64, processing: i64, completed: i64, failed: i64, cancelled: i64) -> BatchSummary {
        BatchSummary {
            batch_id: "b".to_string(),
            status: JobStatus::Pending,
            total: pending + processing + completed + failed + cancelled,
            pending,
            processing,
            completed,
            failed,
            cancelled,
            created_at: 0,
        }
    }

    #[test]
    fn batch_status_derivation() {
        assert_eq!(derive_batch_status(&summary(2, 0, 0, 0, 0)), JobStatus::Pending);
        assert_eq!(derive_batch_status(&summary(1, 1, 0, 0, 0)), JobStatus::Processing);
        assert_eq!(derive_batch_status(&summary(1, 0, 1, 0, 0)), JobStatus::Processing);
        assert_eq!(derive_batch_status(&summary(0, 0, 3, 0, 0)), JobStatus::Completed);
        assert_eq!(derive_batch_status(&summary(0, 0, 2, 1, 0)), JobStatus::Failed);
        assert_eq!(derive_batch_status(&summary(0, 0, 0, 0, 2)), JobStatus::Cancelled);
    }
}
