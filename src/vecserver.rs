//! Vector index service (HTTP).
//!
//! Owns chunking, embedding, storage, and semantic search. Endpoints:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/index` | Chunk, embed, and store a document's sections |
//! | `POST` | `/search` | Cosine-similarity search with optional filters |
//! | `DELETE` | `/documents/{id}/chunks` | Drop a document's chunk set |
//! | `GET`  | `/health` | Model, dimension, device, and index counts |
//!
//! Embedding runs behind a semaphore sized to the device's safe
//! concurrency; the permit is held only for the duration of one request's
//! embedding work.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::embedding;
use crate::httpapi::{bad_request, internal_error, service_unavailable, ApiError};
use crate::vector::{self, IndexSection, SearchFilters, DEFAULT_MAX_RESULTS, MAX_RESULTS_CAP};
use crate::{db, migrate};

#[derive(Clone)]
struct VectorState {
    config: Arc<Config>,
    pool: SqlitePool,
    embed_gate: Arc<Semaphore>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    // Stored vectors must match the configured dimension; a model change
    // requires a migration, never a silently mixed column.
    if config.vector.embedding_enabled() {
        let stored_dims: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT dims FROM chunk_vectors")
            .fetch_all(&pool)
            .await?;
        for dims in stored_dims {
            if dims as usize != config.vector.embedding_dimension {
                anyhow::bail!(
                    "chunk_vectors holds {dims}-dimensional embeddings but {} is configured; \
                     re-index or migrate before starting",
                    config.vector.embedding_dimension
                );
            }
        }
    }

    let state = VectorState {
        config: Arc::new(config.clone()),
        pool,
        embed_gate: Arc::new(Semaphore::new(config.vector.embed_concurrency)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/index", post(handle_index))
        .route("/search", post(handle_search))
        .route("/documents/{id}/chunks", delete(handle_delete_chunks))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind = &config.vector.bind;
    info!(%bind, "vector service listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn map_vector_error(state: &VectorState, err: anyhow::Error) -> ApiError {
    let msg = err.to_string();
    if msg.contains("embedding provider") || msg.contains("disabled") {
        service_unavailable(msg)
    } else {
        internal_error(&err, state.config.gateway.debug)
    }
}

// ============ POST /index ============

#[derive(Deserialize)]
struct IndexRequest {
    document_id: i64,
    sections: Vec<IndexSection>,
}

#[derive(Serialize)]
struct IndexResponse {
    document_id: i64,
    chunks_indexed: usize,
}

async fn handle_index(
    State(state): State<VectorState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let _permit = state
        .embed_gate
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| internal_error(&e.into(), state.config.gateway.debug))?;

    let chunks_indexed = vector::index_document(
        &state.pool,
        &state.config.vector,
        req.document_id,
        &req.sections,
    )
    .await
    .map_err(|e| map_vector_error(&state, e))?;

    info!(document_id = req.document_id, chunks_indexed, "indexed document");

    Ok(Json(IndexResponse {
        document_id: req.document_id,
        chunks_indexed,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    max_results: Option<i64>,
    #[serde(default)]
    document_id: Option<i64>,
    #[serde(default)]
    section: Option<String>,
}

async fn handle_search(
    State(state): State<VectorState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Result<Json<vector::SearchOutcome>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let max_results = match req.max_results {
        None => DEFAULT_MAX_RESULTS,
        Some(n) if n < 1 => {
            return Err(bad_request("max_results must be at least 1"));
        }
        Some(n) => (n as usize).min(MAX_RESULTS_CAP),
    };

    // Principal forwarded by the gateway, for the query log.
    let user_id = headers
        .get("x-ps-user")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let filters = SearchFilters {
        document_id: req.document_id,
        section: req.section,
    };

    let _permit = state
        .embed_gate
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| internal_error(&e.into(), state.config.gateway.debug))?;

    let outcome = vector::search(
        &state.pool,
        &state.config.vector,
        req.query.trim(),
        max_results,
        &filters,
        user_id.as_deref(),
    )
    .await
    .map_err(|e| map_vector_error(&state, e))?;

    Ok(Json(outcome))
}

// ============ DELETE /documents/{id}/chunks ============

#[derive(Serialize)]
struct DeleteChunksResponse {
    document_id: i64,
    deleted: u64,
}

async fn handle_delete_chunks(
    State(state): State<VectorState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteChunksResponse>, ApiError> {
    let deleted = vector::delete_chunks(&state.pool, id)
        .await
        .map_err(|e| internal_error(&e, state.config.gateway.debug))?;
    Ok(Json(DeleteChunksResponse {
        document_id: id,
        deleted,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    embedding_enabled: bool,
    model: String,
    dimension: usize,
    device: String,
    chunks: i64,
    vectors: i64,
}

async fn handle_health(
    State(state): State<VectorState>,
) -> Result<Json<HealthResponse>, ApiError> {
    let (chunks, vectors) = vector::index_stats(&state.pool)
        .await
        .map_err(|e| internal_error(&e, state.config.gateway.debug))?;

    let (model, dimension, device) = match embedding::create_provider(&state.config.vector) {
        Ok(provider) => (
            provider.model_name().to_string(),
            provider.dims(),
            provider.device().to_string(),
        ),
        Err(_) => ("unavailable".to_string(), 0, "none".to_string()),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embedding_enabled: state.config.vector.embedding_enabled(),
        model,
        dimension,
        device,
        chunks,
        vectors,
    }))
}
