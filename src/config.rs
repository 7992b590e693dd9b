//! Configuration parsing and validation.
//!
//! Every component of the cluster reads the same TOML file (default:
//! `config/pstack.toml`). The config defines the database path, upload
//! storage, per-service bind addresses, auth and token settings, vector
//! service tuning, LLM provider settings, and ingestion knobs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory for uploaded PDFs. Figure images land in `{upload_dir}/figures`.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

/// Backing service endpoints used by the gateway, plus the shared proxy bound.
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    #[serde(default = "default_document_service_url")]
    pub document_service_url: String,
    #[serde(default = "default_vector_service_url")]
    pub vector_service_url: String,
    /// Optional OpenAI-compatible completion proxy. When set, requests for
    /// the `openai` provider are routed through it.
    #[serde(default)]
    pub llm_service_url: Option<String>,
    /// Upper bound in seconds for any single proxied call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            document_service_url: default_document_service_url(),
            vector_service_url: default_vector_service_url(),
            llm_service_url: None,
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_document_service_url() -> String {
    "http://127.0.0.1:7401".to_string()
}
fn default_vector_service_url() -> String {
    "http://127.0.0.1:7402".to_string()
}
fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    /// Allowed browser origins. Empty list means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_auth: bool,
    #[serde(default = "default_true")]
    pub require_auth_for_read: bool,
    #[serde(default = "default_true")]
    pub require_auth_for_write: bool,
    #[serde(default = "default_true")]
    pub enable_rate_limiting: bool,
    /// Per-user cap on write operations per minute.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u64,
    /// Disables the Secure cookie flag and enables verbose upstream errors.
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub enable_registration: bool,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_admin_full_name")]
    pub admin_full_name: String,
    /// How long upload-and-analyze waits for vector indexing before
    /// proceeding without RAG context.
    #[serde(default = "default_workflow_index_wait")]
    pub workflow_index_wait_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            cors_origins: Vec::new(),
            enable_auth: true,
            require_auth_for_read: true,
            require_auth_for_write: true,
            enable_rate_limiting: true,
            rate_limit_requests: default_rate_limit_requests(),
            debug: false,
            enable_registration: true,
            admin_email: default_admin_email(),
            admin_password: default_admin_password(),
            admin_full_name: default_admin_full_name(),
            workflow_index_wait_secs: default_workflow_index_wait(),
        }
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1:7400".to_string()
}
fn default_rate_limit_requests() -> u64 {
    100
}
fn default_admin_email() -> String {
    "admin@example.com".to_string()
}
fn default_admin_password() -> String {
    "admin123".to_string()
}
fn default_admin_full_name() -> String {
    "Administrator".to_string()
}
fn default_workflow_index_wait() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HMAC secret for token signing. Required outside debug mode.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default = "default_access_expire_minutes")]
    pub access_token_expire_minutes: i64,
    #[serde(default = "default_refresh_expire_days")]
    pub refresh_token_expire_days: i64,
    #[serde(default = "default_true")]
    pub enable_api_keys: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            jwt_algorithm: default_jwt_algorithm(),
            access_token_expire_minutes: default_access_expire_minutes(),
            refresh_token_expire_days: default_refresh_expire_days(),
            enable_api_keys: true,
        }
    }
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}
fn default_access_expire_minutes() -> i64 {
    30
}
fn default_refresh_expire_days() -> i64 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_bind")]
    pub bind: String,
    /// Embedding backend: disabled, openai, ollama, or local (feature-gated).
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Endpoint for the ollama provider. Defaults to localhost:11434.
    #[serde(default)]
    pub embedding_url: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent embedding batches allowed on the device.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            bind: default_vector_bind(),
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            embedding_url: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            use_gpu: false,
            batch_size: default_batch_size(),
            embed_concurrency: default_embed_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_vector_bind() -> String {
    "127.0.0.1:7402".to_string()
}
fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_concurrency() -> usize {
    1
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_bind")]
    pub bind: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            bind: default_documents_bind(),
        }
    }
}

fn default_documents_bind() -> String {
    "127.0.0.1:7401".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Falls back to the OPENAI_API_KEY environment variable.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// Falls back to the ANTHROPIC_API_KEY environment variable.
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default = "default_llm_provider")]
    pub default_llm_provider: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Chunks retrieved per search for RAG context.
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,
    #[serde(default = "default_true")]
    pub enable_vector_rag: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            default_llm_provider: default_llm_provider(),
            default_model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            rag_top_k: default_rag_top_k(),
            enable_vector_rag: true,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f64 {
    0.7
}
fn default_rag_top_k() -> usize {
    5
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub enable_ocr: bool,
    /// HTTP OCR engine endpoint. Required when enable_ocr is set.
    #[serde(default)]
    pub ocr_engine_url: Option<String>,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_true")]
    pub enable_doi_validation: bool,
    #[serde(default = "default_doi_directory_url")]
    pub doi_directory_url: String,
    /// Two-column layout detection knob passed through to the extractor.
    #[serde(default = "default_section_detection_threshold")]
    pub section_detection_threshold: f64,
    /// Hard per-job timeout.
    #[serde(default = "default_job_timeout_minutes")]
    pub job_timeout_minutes: u64,
    #[serde(default = "default_job_retries")]
    pub max_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enable_ocr: false,
            ocr_engine_url: None,
            ocr_language: default_ocr_language(),
            ocr_dpi: default_ocr_dpi(),
            enable_doi_validation: true,
            doi_directory_url: default_doi_directory_url(),
            section_detection_threshold: default_section_detection_threshold(),
            job_timeout_minutes: default_job_timeout_minutes(),
            max_retries: default_job_retries(),
        }
    }
}

fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_ocr_dpi() -> u32 {
    300
}
fn default_doi_directory_url() -> String {
    "https://api.crossref.org/works".to_string()
}
fn default_section_detection_threshold() -> f64 {
    0.3
}
fn default_job_timeout_minutes() -> u64 {
    60
}
fn default_job_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl VectorConfig {
    pub fn embedding_enabled(&self) -> bool {
        self.embedding_provider != "disabled"
    }
}

impl AuthConfig {
    /// Effective signing secret. Debug mode falls back to a fixed dev key so
    /// a bare config can boot; validation rejects the fallback otherwise.
    pub fn effective_secret(&self) -> String {
        self.secret_key
            .clone()
            .unwrap_or_else(|| "pstack-dev-secret".to_string())
    }
}

impl LlmConfig {
    pub fn openai_key(&self) -> Option<String> {
        self.openai_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn anthropic_key(&self) -> Option<String> {
        self.anthropic_api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.gateway.enable_auth && !config.gateway.debug && config.auth.secret_key.is_none() {
        anyhow::bail!("auth.secret_key is required when auth is enabled outside debug mode");
    }

    match config.auth.jwt_algorithm.as_str() {
        "HS256" | "HS384" | "HS512" => {}
        other => anyhow::bail!(
            "Unknown auth.jwt_algorithm: '{}'. Must be HS256, HS384, or HS512.",
            other
        ),
    }

    if config.auth.access_token_expire_minutes < 1 {
        anyhow::bail!("auth.access_token_expire_minutes must be >= 1");
    }
    if config.auth.refresh_token_expire_days < 1 {
        anyhow::bail!("auth.refresh_token_expire_days must be >= 1");
    }

    match config.vector.embedding_provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown vector.embedding_provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.vector.embedding_enabled() && config.vector.embedding_dimension == 0 {
        anyhow::bail!("vector.embedding_dimension must be > 0");
    }
    if config.vector.chunk_size == 0 {
        anyhow::bail!("vector.chunk_size must be > 0");
    }
    if config.vector.chunk_overlap >= config.vector.chunk_size {
        anyhow::bail!("vector.chunk_overlap must be smaller than vector.chunk_size");
    }
    if config.vector.embed_concurrency == 0 {
        anyhow::bail!("vector.embed_concurrency must be >= 1");
    }

    match config.llm.default_llm_provider.as_str() {
        "openai" | "anthropic" => {}
        other => anyhow::bail!(
            "Unknown llm.default_llm_provider: '{}'. Must be openai or anthropic.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.rag_top_k == 0 || config.llm.rag_top_k > 100 {
        anyhow::bail!("llm.rag_top_k must be in [1, 100]");
    }

    if config.gateway.rate_limit_requests == 0 {
        anyhow::bail!("gateway.rate_limit_requests must be >= 1");
    }

    if config.ingest.enable_ocr && config.ingest.ocr_engine_url.is_none() {
        anyhow::bail!("ingest.ocr_engine_url is required when ingest.enable_ocr is set");
    }
    if !(0.0..=1.0).contains(&config.ingest.section_detection_threshold) {
        anyhow::bail!("ingest.section_detection_threshold must be in [0.0, 1.0]");
    }
    if config.ingest.job_timeout_minutes == 0 {
        anyhow::bail!("ingest.job_timeout_minutes must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/pstack.sqlite"

            [gateway]
            debug = true
            "#,
        )
        .unwrap();
        assert_eq!(config.services.request_timeout, 120);
        assert_eq!(config.auth.access_token_expire_minutes, 30);
        assert_eq!(config.auth.refresh_token_expire_days, 7);
        assert_eq!(config.vector.chunk_size, 500);
        assert_eq!(config.vector.chunk_overlap, 50);
        assert_eq!(config.vector.embedding_dimension, 384);
        assert_eq!(config.gateway.rate_limit_requests, 100);
    }

    #[test]
    fn secret_required_outside_debug() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/pstack.sqlite"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("secret_key"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/pstack.sqlite"

            [gateway]
            debug = true

            [vector]
            chunk_size = 100
            chunk_overlap = 100
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn bad_jwt_algorithm_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/pstack.sqlite"

            [gateway]
            debug = true

            [auth]
            jwt_algorithm = "RS256"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("jwt_algorithm"));
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/pstack.sqlite"

            [gateway]
            debug = true

            [vector]
            embedding_provider = "cohere"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding_provider"));
    }

    #[test]
    fn ocr_requires_engine_url() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/pstack.sqlite"

            [gateway]
            debug = true

            [ingest]
            enable_ocr = true
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ocr_engine_url"));
    }
}
