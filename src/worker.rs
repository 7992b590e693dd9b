//! Ingestion worker pool.
//!
//! Workers claim deliveries from the four logical queues and drive each
//! document through the canonical step sequence, recording every step on
//! the job's audit log and holding the progress contract:
//!
//! | step | progress |
//! |------|----------|
//! | extract_text | 10 |
//! | ocr_check | 25 |
//! | doi_extract | 35 |
//! | parse_sections | 50 |
//! | extract_tables_figures_refs | 70 |
//! | persist_document | 80 |
//! | index_vectors | 90 |
//! | finalize | 100 |
//!
//! Transient failures retry up to three attempts with 60/120/240 second
//! backoff via the broker; terminal failures mark the job failed at once.
//! Cancellation is observed at step boundaries. Redelivery after a crash
//! resumes idempotently: a document already attached to the job is updated
//! in place, never duplicated.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::documents::{self, PersistInput};
use crate::extract::{self, ExtractedDocument};
use crate::models::{ChunkKind, JobStatus, StepStatus};
use crate::ocr::{self, OcrEngine, OCR_CONFIDENCE_THRESHOLD};
use crate::vector::IndexSection;
use crate::{db, doi, jobs, migrate, queue};

/// Retry backoff per failed attempt, in seconds.
const RETRY_BACKOFF_SECS: [i64; 2] = [60, 120];
const FINAL_RETRY_BACKOFF_SECS: i64 = 240;
/// Idle poll interval when every queue is empty.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

const STEP_EXTRACT_TEXT: &str = "extract_text";
const STEP_OCR_CHECK: &str = "ocr_check";
const STEP_DOI_EXTRACT: &str = "doi_extract";
const STEP_PARSE_SECTIONS: &str = "parse_sections";
const STEP_EXTRACT_ARTIFACTS: &str = "extract_tables_figures_refs";
const STEP_PERSIST_DOCUMENT: &str = "persist_document";
const STEP_INDEX_VECTORS: &str = "index_vectors";
const STEP_FINALIZE: &str = "finalize";

/// Task payloads carried on the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    ProcessDocument {
        job_id: String,
        file_path: String,
        original_filename: String,
        owner_id: String,
        #[serde(default)]
        batch_id: Option<String>,
        #[serde(default)]
        force_ocr: bool,
    },
    Reprocess {
        job_id: String,
        document_id: i64,
        #[serde(default)]
        force_ocr: bool,
    },
}

impl TaskPayload {
    pub fn job_id(&self) -> &str {
        match self {
            TaskPayload::ProcessDocument { job_id, .. } => job_id,
            TaskPayload::Reprocess { job_id, .. } => job_id,
        }
    }
}

enum PipelineError {
    /// Worth redelivering: network, broker, temporary storage.
    Transient(anyhow::Error),
    /// Malformed input or constraint violation; retrying cannot help.
    Terminal(anyhow::Error),
    /// The job was cancelled; stop without marking failure.
    Cancelled,
}

struct WorkerCtx {
    config: Arc<Config>,
    pool: SqlitePool,
    http: reqwest::Client,
    ocr_engine: Arc<Box<dyn OcrEngine>>,
    worker_id: String,
}

/// Run `concurrency` worker loops until the process is terminated.
pub async fn run_pool(config: &Config, concurrency: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.services.request_timeout))
        .build()?;
    let ocr_engine = Arc::new(ocr::create_engine(&config.ingest)?);

    let mut handles = Vec::new();
    for n in 0..concurrency.max(1) {
        let ctx = WorkerCtx {
            config: Arc::new(config.clone()),
            pool: pool.clone(),
            http: http.clone(),
            ocr_engine: ocr_engine.clone(),
            worker_id: format!("worker-{n}-{}", &Uuid::new_v4().to_string()[..8]),
        };
        handles.push(tokio::spawn(worker_loop(ctx)));
    }

    info!(workers = concurrency.max(1), "worker pool started");
    for handle in handles {
        handle.await?;
    }
    Ok(())
}

async fn worker_loop(ctx: WorkerCtx) {
    let queues = [
        queue::QUEUE_DOCUMENT_PROCESSING,
        queue::QUEUE_BATCH_PROCESSING,
        queue::QUEUE_METADATA_EXTRACTION,
        queue::QUEUE_OCR_PROCESSING,
    ];
    // Visibility covers the hard job timeout plus scheduling slack.
    let visibility_secs = ctx.config.ingest.job_timeout_minutes as i64 * 60 + 60;

    loop {
        let mut claimed = false;
        for queue_name in queues {
            match queue::claim(&ctx.pool, queue_name, &ctx.worker_id, visibility_secs).await {
                Ok(Some(delivery)) => {
                    claimed = true;
                    handle_delivery(&ctx, delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = queue_name, error = %e, "queue claim failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        if !claimed {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

async fn handle_delivery(ctx: &WorkerCtx, delivery: queue::Delivery) {
    let payload: TaskPayload = match serde_json::from_value(delivery.payload.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            error!(delivery = delivery.id, error = %e, "unparseable task payload, dropping");
            let _ = queue::ack(&ctx.pool, delivery.id).await;
            return;
        }
    };
    let job_id = payload.job_id().to_string();

    // A cancelled job aborts before step 1.
    match jobs::find(&ctx.pool, &job_id).await {
        Ok(Some(job)) if job.status == JobStatus::Cancelled => {
            info!(%job_id, "job cancelled before start");
            let _ = queue::ack(&ctx.pool, delivery.id).await;
            return;
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(%job_id, "delivery references unknown job, dropping");
            let _ = queue::ack(&ctx.pool, delivery.id).await;
            return;
        }
        Err(e) => {
            error!(%job_id, error = %e, "job lookup failed, releasing delivery");
            let _ = queue::nack(&ctx.pool, delivery.id, RETRY_BACKOFF_SECS[0]).await;
            return;
        }
    }

    if !jobs::mark_processing(&ctx.pool, &job_id).await.unwrap_or(false) {
        // Already terminal; nothing to do.
        let _ = queue::ack(&ctx.pool, delivery.id).await;
        return;
    }

    let timeout = Duration::from_secs(ctx.config.ingest.job_timeout_minutes * 60);
    let outcome = match tokio::time::timeout(timeout, run_pipeline(ctx, &payload)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(PipelineError::Terminal(anyhow!(
            "job exceeded hard timeout of {} minutes",
            ctx.config.ingest.job_timeout_minutes
        ))),
    };

    match outcome {
        Ok(document_id) => {
            if jobs::complete(&ctx.pool, &job_id, document_id).await.unwrap_or(false) {
                info!(%job_id, document_id, "job completed");
            }
            let _ = queue::ack(&ctx.pool, delivery.id).await;
        }
        Err(PipelineError::Cancelled) => {
            info!(%job_id, "job cancelled mid-pipeline");
            let _ = queue::ack(&ctx.pool, delivery.id).await;
        }
        Err(PipelineError::Terminal(e)) => {
            error!(%job_id, error = %e, "job failed terminally");
            let _ = jobs::fail(&ctx.pool, &job_id, &format!("{e:#}")).await;
            let _ = queue::ack(&ctx.pool, delivery.id).await;
        }
        Err(PipelineError::Transient(e)) => {
            let max_attempts = ctx.config.ingest.max_retries as i64;
            if delivery.attempts >= max_attempts {
                error!(%job_id, error = %e, attempts = delivery.attempts, "retries exhausted");
                let _ = jobs::fail(
                    &ctx.pool,
                    &job_id,
                    &format!("failed after {} attempts: {e:#}", delivery.attempts),
                )
                .await;
                let _ = queue::ack(&ctx.pool, delivery.id).await;
            } else {
                let backoff = RETRY_BACKOFF_SECS
                    .get((delivery.attempts - 1).max(0) as usize)
                    .copied()
                    .unwrap_or(FINAL_RETRY_BACKOFF_SECS);
                warn!(%job_id, error = %e, attempt = delivery.attempts, backoff, "transient failure, redelivering");
                let _ = queue::nack(&ctx.pool, delivery.id, backoff).await;
            }
        }
    }
}

/// Abort at the next step boundary when the job has been cancelled.
async fn ensure_live(pool: &SqlitePool, job_id: &str) -> std::result::Result<(), PipelineError> {
    match jobs::find(pool, job_id).await {
        Ok(Some(job)) if job.status == JobStatus::Cancelled => Err(PipelineError::Cancelled),
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(PipelineError::Terminal(anyhow!("job row disappeared"))),
        Err(e) => Err(PipelineError::Transient(e)),
    }
}

async fn step_ok(
    pool: &SqlitePool,
    job_id: &str,
    step: &str,
    progress: i64,
    message: &str,
    detail: serde_json::Value,
    started: Instant,
) {
    let duration_ms = started.elapsed().as_millis() as i64;
    if let Err(e) =
        jobs::record_step(pool, job_id, step, StepStatus::Completed, message, detail, duration_ms).await
    {
        warn!(%job_id, step, error = %e, "failed to record step");
    }
    if let Err(e) = jobs::set_progress(pool, job_id, progress).await {
        warn!(%job_id, step, error = %e, "failed to set progress");
    }
}

async fn step_failed(
    pool: &SqlitePool,
    job_id: &str,
    step: &str,
    message: &str,
    started: Instant,
) {
    let duration_ms = started.elapsed().as_millis() as i64;
    if let Err(e) = jobs::record_step(
        pool,
        job_id,
        step,
        StepStatus::Failed,
        message,
        serde_json::json!({}),
        duration_ms,
    )
    .await
    {
        warn!(%job_id, step, error = %e, "failed to record step failure");
    }
}

async fn run_pipeline(
    ctx: &WorkerCtx,
    payload: &TaskPayload,
) -> std::result::Result<i64, PipelineError> {
    match payload {
        TaskPayload::ProcessDocument {
            job_id,
            file_path,
            original_filename,
            owner_id,
            batch_id,
            force_ocr,
        } => {
            process_document(
                ctx,
                job_id,
                Path::new(file_path),
                original_filename,
                owner_id,
                batch_id.as_deref(),
                *force_ocr,
                None,
            )
            .await
        }
        TaskPayload::Reprocess {
            job_id,
            document_id,
            force_ocr,
        } => {
            let doc = documents::find(&ctx.pool, *document_id)
                .await
                .map_err(PipelineError::Transient)?
                .ok_or_else(|| PipelineError::Terminal(anyhow!("document {document_id} not found")))?;
            process_document(
                ctx,
                job_id,
                Path::new(&doc.file_path),
                &doc.filename,
                &doc.owner_id,
                doc.batch_id.as_deref(),
                *force_ocr,
                Some(*document_id),
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_document(
    ctx: &WorkerCtx,
    job_id: &str,
    file_path: &Path,
    original_filename: &str,
    owner_id: &str,
    batch_id: Option<&str>,
    force_ocr: bool,
    reprocess_document_id: Option<i64>,
) -> std::result::Result<i64, PipelineError> {
    let pool = &ctx.pool;

    // Step 1: extract_text
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    if !file_path.exists() {
        // Storage may be briefly out from under us; retry.
        step_failed(pool, job_id, STEP_EXTRACT_TEXT, "file not found", started).await;
        return Err(PipelineError::Transient(anyhow!(
            "uploaded file missing: {}",
            file_path.display()
        )));
    }
    let path_owned = file_path.to_path_buf();
    let mut extracted: ExtractedDocument = match tokio::task::spawn_blocking(move || {
        extract::extract_pdf(&path_owned)
    })
    .await
    {
        Ok(Ok(doc)) => doc,
        Ok(Err(e)) => {
            step_failed(pool, job_id, STEP_EXTRACT_TEXT, &format!("{e:#}"), started).await;
            return Err(PipelineError::Terminal(e.context("PDF parse failed")));
        }
        Err(join_err) => {
            step_failed(pool, job_id, STEP_EXTRACT_TEXT, "extraction task aborted", started).await;
            return Err(PipelineError::Transient(anyhow!(join_err)));
        }
    };
    step_ok(
        pool,
        job_id,
        STEP_EXTRACT_TEXT,
        10,
        &format!("extracted {} pages", extracted.page_count),
        serde_json::json!({
            "page_count": extracted.page_count,
            "chars": extracted.full_text.chars().count(),
        }),
        started,
    )
    .await;

    // Step 2: ocr_check
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    let confidence = extract::scanned_confidence(&extracted.full_text, extracted.page_count);
    let mut ocr_applied = false;
    if (force_ocr || confidence >= OCR_CONFIDENCE_THRESHOLD) && ctx.config.ingest.enable_ocr {
        match ctx.ocr_engine.recognize(file_path).await {
            Ok(text) => {
                ocr_applied = true;
                extracted = extract::parse_document(&text, extracted.page_count);
                step_ok(
                    pool,
                    job_id,
                    STEP_OCR_CHECK,
                    25,
                    "OCR applied",
                    serde_json::json!({ "scanned_confidence": confidence }),
                    started,
                )
                .await;
            }
            Err(e) => {
                // OCR failure falls through with a warning; the text layer
                // we already have is better than nothing.
                warn!(%job_id, error = %e, "OCR failed, continuing without it");
                step_failed(pool, job_id, STEP_OCR_CHECK, &format!("OCR failed: {e:#}"), started).await;
            }
        }
    } else {
        step_ok(
            pool,
            job_id,
            STEP_OCR_CHECK,
            25,
            if confidence >= OCR_CONFIDENCE_THRESHOLD {
                "document looks scanned but OCR is disabled"
            } else {
                "text layer present, OCR not needed"
            },
            serde_json::json!({ "scanned_confidence": confidence }),
            started,
        )
        .await;
    }

    // Step 3: doi_extract (best-effort)
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    let mut doi_value = doi::extract_doi(&extracted.full_text);
    if let Some(candidate) = doi_value.clone() {
        if ctx.config.ingest.enable_doi_validation {
            match doi::validate_doi(&ctx.config.ingest, &candidate).await {
                Ok(validation) if !validation.valid => {
                    doi_value = None;
                    step_ok(
                        pool,
                        job_id,
                        STEP_DOI_EXTRACT,
                        35,
                        "DOI not found in directory, dropped",
                        serde_json::json!({ "candidate": candidate }),
                        started,
                    )
                    .await;
                }
                Ok(validation) => {
                    step_ok(
                        pool,
                        job_id,
                        STEP_DOI_EXTRACT,
                        35,
                        "DOI validated",
                        serde_json::json!({ "doi": validation.doi, "title": validation.title }),
                        started,
                    )
                    .await;
                }
                Err(e) => {
                    // Directory trouble is never fatal to ingestion.
                    warn!(%job_id, error = %e, "DOI validation unavailable");
                    step_ok(
                        pool,
                        job_id,
                        STEP_DOI_EXTRACT,
                        35,
                        "DOI kept unvalidated (directory unavailable)",
                        serde_json::json!({ "doi": candidate }),
                        started,
                    )
                    .await;
                }
            }
        } else {
            step_ok(
                pool,
                job_id,
                STEP_DOI_EXTRACT,
                35,
                "DOI extracted (validation disabled)",
                serde_json::json!({ "doi": candidate }),
                started,
            )
            .await;
        }
    } else {
        step_ok(
            pool,
            job_id,
            STEP_DOI_EXTRACT,
            35,
            "no DOI found",
            serde_json::json!({}),
            started,
        )
        .await;
    }

    // Step 4: parse_sections (terminal on failure)
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    if extracted.full_text.trim().is_empty() {
        step_failed(pool, job_id, STEP_PARSE_SECTIONS, "no extractable text", started).await;
        return Err(PipelineError::Terminal(anyhow!(
            "document has no extractable text"
        )));
    }
    step_ok(
        pool,
        job_id,
        STEP_PARSE_SECTIONS,
        50,
        &format!("detected {} sections", extracted.sections.len()),
        serde_json::json!({
            "sections": extracted.sections.keys().collect::<Vec<_>>(),
            "has_abstract": extracted.abstract_text.is_some(),
        }),
        started,
    )
    .await;

    // Step 5: extract_tables_figures_refs (best-effort per artifact class)
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    step_ok(
        pool,
        job_id,
        STEP_EXTRACT_ARTIFACTS,
        70,
        &format!(
            "{} tables, {} figures, {} references",
            extracted.tables.len(),
            extracted.figures.len(),
            extracted.references.len()
        ),
        serde_json::json!({
            "tables": extracted.tables.len(),
            "figures": extracted.figures.len(),
            "references": extracted.references.len(),
        }),
        started,
    )
    .await;

    // Step 6: persist_document (terminal on failure)
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    let current_job = jobs::find(pool, job_id)
        .await
        .map_err(PipelineError::Transient)?
        .ok_or_else(|| PipelineError::Terminal(anyhow!("job row disappeared")))?;
    // Redelivery after a crash between persist and finalize re-uses the
    // attached document instead of inserting a second one.
    let existing_id = reprocess_document_id.or(current_job.document_id);
    let document_id = match existing_id {
        Some(id) => {
            let updated =
                documents::replace_derived(pool, id, doi_value.as_deref(), &extracted, ocr_applied)
                    .await
                    .map_err(|e| classify_db_error(e, STEP_PERSIST_DOCUMENT))?;
            if !updated {
                step_failed(pool, job_id, STEP_PERSIST_DOCUMENT, "document vanished", started).await;
                return Err(PipelineError::Terminal(anyhow!(
                    "document {id} no longer exists"
                )));
            }
            id
        }
        None => {
            let id = documents::insert(
                pool,
                PersistInput {
                    filename: original_filename,
                    file_path: &file_path.to_string_lossy(),
                    owner_id,
                    doi: doi_value.as_deref(),
                    extracted: &extracted,
                    ocr_applied,
                    batch_id,
                },
            )
            .await
            .map_err(|e| classify_db_error(e, STEP_PERSIST_DOCUMENT))?;
            jobs::attach_document(pool, job_id, id)
                .await
                .map_err(PipelineError::Transient)?;
            id
        }
    };
    step_ok(
        pool,
        job_id,
        STEP_PERSIST_DOCUMENT,
        80,
        &format!("document {document_id} persisted"),
        serde_json::json!({ "document_id": document_id }),
        started,
    )
    .await;

    // Cancellation after persist rolls the document back out; the chunks
    // were never written.
    match ensure_live(pool, job_id).await {
        Ok(()) => {}
        Err(PipelineError::Cancelled) => {
            if reprocess_document_id.is_none() {
                let _ = documents::delete(pool, document_id).await;
            }
            return Err(PipelineError::Cancelled);
        }
        Err(other) => return Err(other),
    }

    // Step 7: index_vectors (failure completes the job with a warning)
    let started = Instant::now();
    match index_vectors(ctx, document_id, &extracted).await {
        Ok(chunk_count) => {
            step_ok(
                pool,
                job_id,
                STEP_INDEX_VECTORS,
                90,
                &format!("{chunk_count} chunks indexed"),
                serde_json::json!({ "chunks": chunk_count }),
                started,
            )
            .await;
        }
        Err(e) => {
            warn!(%job_id, document_id, error = %e, "vector indexing failed; document searchable by metadata only");
            step_failed(
                pool,
                job_id,
                STEP_INDEX_VECTORS,
                &format!("indexing failed: {e:#}"),
                started,
            )
            .await;
        }
    }

    // Step 8: finalize
    ensure_live(pool, job_id).await?;
    let started = Instant::now();
    step_ok(
        pool,
        job_id,
        STEP_FINALIZE,
        100,
        "pipeline complete",
        serde_json::json!({}),
        started,
    )
    .await;

    Ok(document_id)
}

fn classify_db_error(e: anyhow::Error, step: &str) -> PipelineError {
    // Constraint violations are terminal; pool/network trouble is not.
    let msg = format!("{e:#}");
    if msg.contains("UNIQUE") || msg.contains("FOREIGN KEY") || msg.contains("CHECK") {
        PipelineError::Terminal(e.context(format!("{step}: constraint violation")))
    } else {
        PipelineError::Transient(e)
    }
}

/// Ship the parsed document to the vector service for chunking/embedding.
async fn index_vectors(
    ctx: &WorkerCtx,
    document_id: i64,
    extracted: &ExtractedDocument,
) -> Result<usize> {
    let mut sections: Vec<IndexSection> = Vec::new();

    if let Some(abstract_text) = &extracted.abstract_text {
        if !extracted.sections.contains_key("abstract") {
            sections.push(IndexSection {
                name: Some("abstract".to_string()),
                text: abstract_text.clone(),
                page: None,
                kind: ChunkKind::Text,
            });
        }
    }
    for (name, body) in &extracted.sections {
        sections.push(IndexSection {
            name: Some(name.clone()),
            text: body.clone(),
            page: None,
            kind: ChunkKind::Text,
        });
    }
    // No detected structure: index the raw text so search still works.
    if sections.is_empty() {
        sections.push(IndexSection {
            name: None,
            text: extracted.full_text.clone(),
            page: None,
            kind: ChunkKind::Text,
        });
    }
    for figure in &extracted.figures {
        sections.push(IndexSection {
            name: None,
            text: format!("{}: {}", figure.label, figure.caption),
            page: figure.page,
            kind: ChunkKind::Caption,
        });
    }
    for table in &extracted.tables {
        sections.push(IndexSection {
            name: None,
            text: format!("{}: {}", table.label, table.caption),
            page: table.page,
            kind: ChunkKind::Caption,
        });
    }

    let url = format!(
        "{}/index",
        ctx.config.services.vector_service_url.trim_end_matches('/')
    );
    let response = ctx
        .http
        .post(&url)
        .json(&serde_json::json!({ "document_id": document_id, "sections": sections }))
        .send()
        .await
        .context("vector service unreachable")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("vector service error {status}: {body}");
    }

    let json: serde_json::Value = response.json().await?;
    Ok(json
        .get("chunks_indexed")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let payload = TaskPayload::ProcessDocument {
            job_id: "j1".to_string(),
            file_path: "/tmp/a.pdf".to_string(),
            original_filename: "a.pdf".to_string(),
            owner_id: "u1".to_string(),
            batch_id: None,
            force_ocr: false,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "process_document");
        assert_eq!(json["job_id"], "j1");
        let back: TaskPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.job_id(), "j1");
    }

    #[test]
    fn reprocess_payload_defaults() {
        let json = serde_json::json!({
            "kind": "reprocess",
            "job_id": "j2",
            "document_id": 9,
        });
        let payload: TaskPayload = serde_json::from_value(json).unwrap();
        match payload {
            TaskPayload::Reprocess {
                document_id,
                force_ocr,
                ..
            } => {
                assert_eq!(document_id, 9);
                assert!(!force_ocr);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn backoff_schedule() {
        // Attempt numbering starts at 1 on first delivery.
        assert_eq!(RETRY_BACKOFF_SECS.first().copied().unwrap(), 60);
        assert_eq!(RETRY_BACKOFF_SECS.get(1).copied().unwrap(), 120);
        assert_eq!(FINAL_RETRY_BACKOFF_SECS, 240);
    }
}
