//! Document service (HTTP).
//!
//! Fronts the ingestion side of the platform: uploads (synchronous and
//! queued), document retrieval and deletion, the job/batch observation
//! surface, and reprocessing. Sits behind the gateway and trusts the
//! `x-ps-user` / `x-ps-role` headers the gateway injects after
//! authentication; it is never exposed directly.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::documents::{self, PersistInput};
use crate::extract;
use crate::httpapi::{
    bad_request, forbidden, internal_error, not_found, unauthorized, ApiError,
};
use crate::models::{Document, JobStatus, Role};
use crate::worker::TaskPayload;
use crate::{db, jobs, migrate, queue};

#[derive(Clone)]
struct DocState {
    config: Arc<Config>,
    pool: SqlitePool,
    http: reqwest::Client,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    tokio::fs::create_dir_all(&config.storage.upload_dir).await?;
    tokio::fs::create_dir_all(config.storage.upload_dir.join("figures")).await?;

    let state = DocState {
        config: Arc::new(config.clone()),
        pool,
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(config.services.request_timeout))
            .build()?,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/upload-async", post(handle_upload_async))
        .route("/upload-batch", post(handle_upload_batch))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}", get(handle_get_document).delete(handle_delete_document))
        .route("/documents/{id}/sections", get(handle_get_sections))
        .route("/documents/{id}/tables", get(handle_get_tables))
        .route("/documents/{id}/figures", get(handle_get_figures))
        .route("/documents/{id}/references", get(handle_get_references))
        .route("/documents/{id}/figures/{num}/file", get(handle_get_figure_file))
        .route("/documents/{id}/reprocess", post(handle_reprocess))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/jobs/{id}/cancel", post(handle_cancel_job))
        .route("/batches", get(handle_list_batches))
        .route("/batches/{id}", get(handle_get_batch))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind = &config.documents.bind;
    info!(%bind, "document service listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Caller identity (injected by the gateway) ============

struct Caller {
    user_id: String,
    role: Role,
}

fn caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let user_id = headers
        .get("x-ps-user")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| unauthorized("missing gateway principal"))?;
    let role = headers
        .get("x-ps-role")
        .and_then(|v| v.to_str().ok())
        .and_then(Role::parse)
        .unwrap_or(Role::User);
    Ok(Caller {
        user_id: user_id.to_string(),
        role,
    })
}

fn check_owner(caller: &Caller, doc: &Document) -> Result<(), ApiError> {
    if caller.role == Role::Admin || doc.owner_id == caller.user_id {
        Ok(())
    } else {
        Err(forbidden("document belongs to another user"))
    }
}

impl DocState {
    fn internal(&self, e: anyhow::Error) -> ApiError {
        internal_error(&e, self.config.gateway.debug)
    }

    async fn owned_document(&self, caller: &Caller, id: i64) -> Result<Document, ApiError> {
        let doc = documents::find(&self.pool, id)
            .await
            .map_err(|e| self.internal(e))?
            .ok_or_else(|| not_found(format!("document {id} not found")))?;
        check_owner(caller, &doc)?;
        Ok(doc)
    }
}

// ============ Upload plumbing ============

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.pdf".to_string()
    } else {
        cleaned
    }
}

/// Duplicate filenames are fine: each upload lands under its own
/// timestamped prefix.
fn stored_path(config: &Config, original: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    config
        .storage
        .upload_dir
        .join(format!("{stamp}_{}", sanitize_filename(original)))
}

async fn read_upload(multipart: &mut Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload.pdf".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;
        if bytes.is_empty() {
            return Err(bad_request("uploaded file is empty"));
        }
        return Ok((filename, bytes.to_vec()));
    }
    Err(bad_request("multipart field 'file' is required"))
}

async fn save_upload(
    state: &DocState,
    filename: &str,
    bytes: &[u8],
) -> Result<PathBuf, ApiError> {
    let path = stored_path(&state.config, filename);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| state.internal(anyhow::anyhow!("storing upload failed: {e}")))?;
    Ok(path)
}

// ============ POST /upload (synchronous) ============

#[derive(Serialize)]
struct UploadResponse {
    id: i64,
    filename: String,
    upload_date: String,
    title: Option<String>,
    authors: Vec<String>,
    file_path: String,
}

async fn handle_upload(
    State(state): State<DocState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let caller = caller(&headers)?;
    let (filename, bytes) = read_upload(&mut multipart).await?;
    let path = save_upload(&state, &filename, &bytes).await?;

    let path_owned = path.clone();
    let extracted = tokio::task::spawn_blocking(move || extract::extract_pdf(&path_owned))
        .await
        .map_err(|e| state.internal(e.into()))?
        .map_err(|e| bad_request(format!("PDF parse failed: {e:#}")))?;

    let doc_id = documents::insert(
        &state.pool,
        PersistInput {
            filename: &filename,
            file_path: &path.to_string_lossy(),
            owner_id: &caller.user_id,
            doi: None,
            extracted: &extracted,
            ocr_applied: false,
            batch_id: None,
        },
    )
    .await
    .map_err(|e| state.internal(e))?;

    // Synchronous path: index inline; a vector-service hiccup does not
    // lose the document.
    if let Err(e) = index_inline(&state, doc_id, &extracted).await {
        warn!(document_id = doc_id, error = %e, "inline indexing failed");
    }

    let doc = documents::find(&state.pool, doc_id)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| not_found("document vanished after insert"))?;

    Ok(Json(UploadResponse {
        id: doc.id,
        filename: doc.filename,
        upload_date: format_ts(doc.uploaded_at),
        title: doc.title,
        authors: doc.authors,
        file_path: doc.file_path,
    }))
}

async fn index_inline(
    state: &DocState,
    document_id: i64,
    extracted: &extract::ExtractedDocument,
) -> anyhow::Result<()> {
    let mut sections: Vec<serde_json::Value> = extracted
        .sections
        .iter()
        .map(|(name, body)| serde_json::json!({ "name": name, "text": body }))
        .collect();
    if sections.is_empty() {
        sections.push(serde_json::json!({ "name": null, "text": extracted.full_text }));
    }
    let url = format!(
        "{}/index",
        state.config.services.vector_service_url.trim_end_matches('/')
    );
    let response = state
        .http
        .post(&url)
        .json(&serde_json::json!({ "document_id": document_id, "sections": sections }))
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("vector service returned {}", response.status());
    }
    Ok(())
}

// ============ POST /upload-async ============

#[derive(Serialize)]
struct UploadAsyncResponse {
    success: bool,
    job_id: String,
    task_id: i64,
    filename: String,
    status_endpoint: String,
}

async fn handle_upload_async(
    State(state): State<DocState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadAsyncResponse>, ApiError> {
    let caller = caller(&headers)?;
    let (filename, bytes) = read_upload(&mut multipart).await?;
    let size = bytes.len() as i64;
    let path = save_upload(&state, &filename, &bytes).await?;

    let job = jobs::create(&state.pool, &caller.user_id, &filename, size, None, serde_json::json!({}))
        .await
        .map_err(|e| state.internal(e))?;

    let payload = TaskPayload::ProcessDocument {
        job_id: job.id.clone(),
        file_path: path.to_string_lossy().into_owned(),
        original_filename: filename.clone(),
        owner_id: caller.user_id.clone(),
        batch_id: None,
        force_ocr: false,
    };
    let task_id = queue::enqueue(
        &state.pool,
        queue::QUEUE_DOCUMENT_PROCESSING,
        &serde_json::to_value(&payload).map_err(|e| state.internal(e.into()))?,
    )
    .await
    .map_err(|e| state.internal(e))?;

    info!(job_id = %job.id, %filename, "queued document for processing");

    Ok(Json(UploadAsyncResponse {
        success: true,
        job_id: job.id.clone(),
        task_id,
        filename,
        status_endpoint: format!("/api/v1/jobs/{}", job.id),
    }))
}

// ============ POST /upload-batch ============

#[derive(Serialize)]
struct BatchUploadResponse {
    success: bool,
    batch_id: String,
    job_ids: Vec<String>,
    files: usize,
}

async fn handle_upload_batch(
    State(state): State<DocState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, ApiError> {
    let caller = caller(&headers)?;
    let batch_id = Uuid::new_v4().to_string();
    let mut job_ids = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("files") && field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload.pdf".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;
        if bytes.is_empty() {
            continue;
        }
        let size = bytes.len() as i64;
        let path = save_upload(&state, &filename, &bytes).await?;

        let job = jobs::create(
            &state.pool,
            &caller.user_id,
            &filename,
            size,
            Some(&batch_id),
            serde_json::json!({}),
        )
        .await
        .map_err(|e| state.internal(e))?;

        let payload = TaskPayload::ProcessDocument {
            job_id: job.id.clone(),
            file_path: path.to_string_lossy().into_owned(),
            original_filename: filename,
            owner_id: caller.user_id.clone(),
            batch_id: Some(batch_id.clone()),
            force_ocr: false,
        };
        queue::enqueue(
            &state.pool,
            queue::QUEUE_BATCH_PROCESSING,
            &serde_json::to_value(&payload).map_err(|e| state.internal(e.into()))?,
        )
        .await
        .map_err(|e| state.internal(e))?;

        job_ids.push(job.id);
    }

    if job_ids.is_empty() {
        return Err(bad_request("no files in batch upload"));
    }

    info!(%batch_id, files = job_ids.len(), "queued batch");

    Ok(Json(BatchUploadResponse {
        success: true,
        batch_id,
        files: job_ids.len(),
        job_ids,
    }))
}

// ============ Document reads ============

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    skip: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn handle_list_documents(
    State(state): State<DocState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let caller = caller(&headers)?;
    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let docs = documents::list_for_owner(&state.pool, &caller.user_id, skip, limit)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(docs))
}

async fn handle_get_document(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Document>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;
    Ok(Json(doc))
}

async fn handle_get_sections(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;
    Ok(Json(serde_json::json!({ "id": doc.id, "sections": doc.sections })))
}

async fn handle_get_tables(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;
    Ok(Json(serde_json::json!({ "id": doc.id, "tables": doc.tables })))
}

async fn handle_get_figures(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;
    Ok(Json(serde_json::json!({ "id": doc.id, "figures": doc.figures })))
}

async fn handle_get_references(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;
    Ok(Json(serde_json::json!({ "id": doc.id, "references": doc.references })))
}

async fn handle_get_figure_file(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path((id, num)): Path<(i64, usize)>,
) -> Result<axum::response::Response, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;

    let figures = doc.figures.as_array().cloned().unwrap_or_default();
    let figure = figures
        .get(num.checked_sub(1).ok_or_else(|| bad_request("figure numbers start at 1"))?)
        .ok_or_else(|| not_found(format!("document {id} has no figure {num}")))?;
    let file = figure
        .get("file")
        .and_then(|f| f.as_str())
        .ok_or_else(|| not_found(format!("figure {num} has no rendered image")))?;

    let bytes = tokio::fs::read(file)
        .await
        .map_err(|_| not_found(format!("figure file missing on disk: {file}")))?;

    Ok((
        [(axum::http::header::CONTENT_TYPE, "image/png")],
        bytes,
    )
        .into_response())
}

async fn handle_delete_document(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;

    // Chunks and vectors go in the same transaction as the document row.
    documents::delete(&state.pool, doc.id)
        .await
        .map_err(|e| state.internal(e))?;

    if let Err(e) = tokio::fs::remove_file(&doc.file_path).await {
        warn!(document_id = id, error = %e, "stored PDF already gone");
    }

    info!(document_id = id, "document deleted");
    Ok(Json(serde_json::json!({ "deleted": true, "id": id })))
}

// ============ POST /documents/{id}/reprocess ============

#[derive(Deserialize)]
struct ReprocessQuery {
    #[serde(default)]
    force_ocr: bool,
}

#[derive(Serialize)]
struct ReprocessResponse {
    job_id: String,
    document_id: i64,
    status_endpoint: String,
}

async fn handle_reprocess(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ReprocessQuery>,
) -> Result<Json<ReprocessResponse>, ApiError> {
    let caller = caller(&headers)?;
    let doc = state.owned_document(&caller, id).await?;

    let job = jobs::create(
        &state.pool,
        &caller.user_id,
        &doc.filename,
        0,
        None,
        serde_json::json!({ "reprocess_of": id, "force_ocr": query.force_ocr }),
    )
    .await
    .map_err(|e| state.internal(e))?;

    let payload = TaskPayload::Reprocess {
        job_id: job.id.clone(),
        document_id: id,
        force_ocr: query.force_ocr,
    };
    let target_queue = if query.force_ocr {
        queue::QUEUE_OCR_PROCESSING
    } else {
        queue::QUEUE_METADATA_EXTRACTION
    };
    queue::enqueue(
        &state.pool,
        target_queue,
        &serde_json::to_value(&payload).map_err(|e| state.internal(e.into()))?,
    )
    .await
    .map_err(|e| state.internal(e))?;

    Ok(Json(ReprocessResponse {
        job_id: job.id.clone(),
        document_id: id,
        status_endpoint: format!("/api/v1/jobs/{}", job.id),
    }))
}

// ============ Jobs ============

#[derive(Deserialize)]
struct JobListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    skip: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn handle_list_jobs(
    State(state): State<DocState>,
    headers: HeaderMap,
    Query(query): Query<JobListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => Some(
            JobStatus::parse(s)
                .ok_or_else(|| bad_request(format!("unknown job status filter: {s}")))?,
        ),
    };
    let skip = query.skip.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let jobs = jobs::list_for_owner(&state.pool, &caller.user_id, status, skip, limit)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

async fn handle_get_job(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let job = jobs::find(&state.pool, &id)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| not_found(format!("job {id} not found")))?;
    if caller.role != Role::Admin && job.owner_id != caller.user_id {
        return Err(forbidden("job belongs to another user"));
    }
    let steps = jobs::steps(&state.pool, &id)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(serde_json::json!({ "job": job, "steps": steps })))
}

async fn handle_cancel_job(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let job = jobs::find(&state.pool, &id)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| not_found(format!("job {id} not found")))?;
    if caller.role != Role::Admin && job.owner_id != caller.user_id {
        return Err(forbidden("job belongs to another user"));
    }
    if job.status.is_terminal() {
        return Err(bad_request(format!(
            "job is already {}, cannot cancel",
            job.status.as_str()
        )));
    }

    let cancelled = jobs::cancel(&state.pool, &id)
        .await
        .map_err(|e| state.internal(e))?;
    if cancelled && job.status == JobStatus::Pending {
        // Best-effort removal of the pending delivery; the worker
        // double-checks job status on dequeue either way.
        for queue_name in [
            queue::QUEUE_DOCUMENT_PROCESSING,
            queue::QUEUE_BATCH_PROCESSING,
            queue::QUEUE_METADATA_EXTRACTION,
            queue::QUEUE_OCR_PROCESSING,
        ] {
            let _ = queue::remove_pending_for_job(&state.pool, queue_name, &id).await;
        }
    }

    Ok(Json(serde_json::json!({ "cancelled": cancelled, "job_id": id })))
}

// ============ Batches ============

async fn handle_list_batches(
    State(state): State<DocState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = caller(&headers)?;
    let batches = jobs::list_batches(&state.pool, &caller.user_id)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(serde_json::json!({ "batches": batches })))
}

async fn handle_get_batch(
    State(state): State<DocState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<jobs::BatchSummary>, ApiError> {
    let caller = caller(&headers)?;
    let batch = jobs::find_batch(&state.pool, &caller.user_id, &id)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| not_found(format!("batch {id} not found")))?;
    Ok(Json(batch))
}

// ============ GET /health ============

async fn handle_health(
    State(state): State<DocState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let storage_ok = state.config.storage.upload_dir.is_dir();
    let mut depths = serde_json::Map::new();
    for queue_name in [
        queue::QUEUE_DOCUMENT_PROCESSING,
        queue::QUEUE_BATCH_PROCESSING,
        queue::QUEUE_METADATA_EXTRACTION,
        queue::QUEUE_OCR_PROCESSING,
    ] {
        let depth = queue::depth(&state.pool, queue_name)
            .await
            .map_err(|e| state.internal(e))?;
        depths.insert(queue_name.to_string(), serde_json::json!(depth));
    }

    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "storage_ok": storage_ok,
        "queues": depths,
        "ocr_enabled": state.config.ingest.enable_ocr,
        "doi_validation_enabled": state.config.ingest.enable_doi_validation,
    })))
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("paper (final).pdf"), "paper__final_.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename(""), "upload.pdf");
    }

    #[test]
    fn stored_paths_are_prefixed_per_upload() {
        let config = Config {
            db: crate::config::DbConfig {
                path: "/tmp/x.sqlite".into(),
                pool_size: 1,
            },
            storage: Default::default(),
            services: Default::default(),
            gateway: Default::default(),
            auth: Default::default(),
            vector: Default::default(),
            documents: Default::default(),
            llm: Default::default(),
            ingest: Default::default(),
        };
        let a = stored_path(&config, "paper.pdf");
        let b = stored_path(&config, "paper.pdf");
        assert!(a.to_string_lossy().ends_with("_paper.pdf"));
        // Same filename twice is accepted; prefixes differ by timestamp or
        // at worst collide only within the same millisecond.
        assert_eq!(a.parent(), b.parent());
    }
}
