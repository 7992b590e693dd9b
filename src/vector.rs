//! Chunk store and semantic search.
//!
//! Indexing chunks a document's sections, embeds the chunk texts in batches,
//! and writes chunks plus vectors in one transaction per document, so
//! readers see either the old set or the new set, never a mix. Search
//! embeds the query with the same model, ranks stored vectors by cosine
//! similarity in process, and joins document titles from the store.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::time::Instant;

use crate::chunk::{self, SectionText};
use crate::config::VectorConfig;
use crate::embedding;
use crate::models::{Chunk, ChunkKind};

/// Upper bound on `max_results`.
pub const MAX_RESULTS_CAP: usize = 100;
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// One span submitted for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSection {
    pub name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default = "default_kind")]
    pub kind: ChunkKind,
}

fn default_kind() -> ChunkKind {
    ChunkKind::Text
}

/// Optional narrowing of a search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilters {
    pub document_id: Option<i64>,
    pub section: Option<String>,
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultChunk {
    pub chunk_id: String,
    pub document_id: i64,
    pub document_title: Option<String>,
    pub section: Option<String>,
    pub text: String,
    /// Cosine similarity floored at 0, so always in `[0, 1]`.
    pub similarity_score: f64,
    pub page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub results_count: usize,
    pub search_time_ms: u64,
    pub chunks: Vec<SearchResultChunk>,
}

/// Chunk, embed, and store a document's sections. Replaces any previous
/// chunk set for the document. Returns the number of chunks written.
pub async fn index_document(
    pool: &SqlitePool,
    config: &VectorConfig,
    document_id: i64,
    sections: &[IndexSection],
) -> Result<usize> {
    let inputs: Vec<SectionText<'_>> = sections
        .iter()
        .map(|s| SectionText {
            name: s.name.as_deref(),
            text: &s.text,
            page: s.page,
            kind: s.kind,
        })
        .collect();

    let chunks = chunk::chunk_document(
        document_id,
        &inputs,
        config.chunk_size,
        config.chunk_overlap,
    );
    if chunks.is_empty() {
        replace_chunks(pool, config, document_id, &[], &[]).await?;
        return Ok(0);
    }

    // Embed in provider-sized batches before opening the transaction; the
    // write itself stays a single atomic swap.
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    for batch in texts.chunks(config.batch_size.max(1)) {
        let batch_vectors = embedding::embed_texts(config, batch).await?;
        vectors.extend(batch_vectors);
    }

    replace_chunks(pool, config, document_id, &chunks, &vectors).await?;
    Ok(chunks.len())
}

/// Swap the stored chunk set for `document_id` in one transaction.
async fn replace_chunks(
    pool: &SqlitePool,
    config: &VectorConfig,
    document_id: i64,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    if chunks.len() != vectors.len() {
        bail!(
            "{} chunks but {} vectors for document {}",
            chunks.len(),
            vectors.len(),
            document_id
        );
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, section, page, kind, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.section)
        .bind(chunk.page)
        .bind(chunk.kind.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, document_id, embedding, dims, model, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(chunk.document_id)
        .bind(embedding::vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(&config.embedding_model)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Delete all chunks and vectors for a document. Invoked on document
/// deletion and before re-index on reprocess.
pub async fn delete_chunks(pool: &SqlitePool, document_id: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

struct Candidate {
    chunk_id: String,
    document_id: i64,
    document_title: Option<String>,
    section: Option<String>,
    text: String,
    page: Option<i64>,
    embedding: Vec<f32>,
}

/// Rank candidates by cosine similarity against the query vector. Scores
/// are floored at zero so callers always see `[0, 1]`.
fn rank_candidates(
    query_vec: &[f32],
    candidates: Vec<Candidate>,
    max_results: usize,
) -> Vec<SearchResultChunk> {
    let mut scored: Vec<SearchResultChunk> = candidates
        .into_iter()
        .map(|c| {
            let score = embedding::cosine_similarity(query_vec, &c.embedding) as f64;
            SearchResultChunk {
                chunk_id: c.chunk_id,
                document_id: c.document_id,
                document_title: c.document_title,
                section: c.section,
                text: c.text,
                similarity_score: score.clamp(0.0, 1.0),
                page: c.page,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(max_results);
    scored
}

/// Execute a search: embed the query, rank stored vectors, join titles.
/// `max_results` must already be validated into `[1, MAX_RESULTS_CAP]`.
pub async fn search(
    pool: &SqlitePool,
    config: &VectorConfig,
    query: &str,
    max_results: usize,
    filters: &SearchFilters,
    user_id: Option<&str>,
) -> Result<SearchOutcome> {
    let started = Instant::now();

    if !config.embedding_enabled() {
        bail!("semantic search requires an embedding provider");
    }

    let query_vec = embedding::embed_query(config, query).await?;

    let base = "SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text, c.section, c.page, d.title
                FROM chunk_vectors cv
                JOIN chunks c ON c.id = cv.chunk_id
                JOIN documents d ON d.id = cv.document_id";

    let rows = match (filters.document_id, filters.section.as_deref()) {
        (Some(doc_id), Some(section)) => {
            sqlx::query(&format!("{base} WHERE cv.document_id = ? AND c.section = ?"))
                .bind(doc_id)
                .bind(section)
                .fetch_all(pool)
                .await?
        }
        (Some(doc_id), None) => {
            sqlx::query(&format!("{base} WHERE cv.document_id = ?"))
                .bind(doc_id)
                .fetch_all(pool)
                .await?
        }
        (None, Some(section)) => {
            sqlx::query(&format!("{base} WHERE c.section = ?"))
                .bind(section)
                .fetch_all(pool)
                .await?
        }
        (None, None) => sqlx::query(base).fetch_all(pool).await?,
    };

    let candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Candidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                document_title: row.get("title"),
                section: row.get("section"),
                text: row.get("text"),
                page: row.get("page"),
                embedding: embedding::blob_to_vec(&blob),
            }
        })
        .collect();

    let chunks = rank_candidates(&query_vec, candidates, max_results);
    let search_time_ms = started.elapsed().as_millis() as u64;

    log_search(pool, query, user_id, chunks.len(), search_time_ms).await?;

    Ok(SearchOutcome {
        query: query.to_string(),
        results_count: chunks.len(),
        search_time_ms,
        chunks,
    })
}

async fn log_search(
    pool: &SqlitePool,
    query: &str,
    user_id: Option<&str>,
    result_count: usize,
    duration_ms: u64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO search_log (query, user_id, result_count, duration_ms, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(query)
    .bind(user_id)
    .bind(result_count as i64)
    .bind(duration_ms as i64)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Counts reported by the vector service's health endpoint.
pub async fn index_stats(pool: &SqlitePool) -> Result<(i64, i64)> {
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    Ok((chunks, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, embedding: Vec<f32>) -> Candidate {
        Candidate {
            chunk_id: id.to_string(),
            document_id: 1,
            document_title: Some("Paper".to_string()),
            section: None,
            text: format!("text for {id}"),
            page: None,
            embedding,
        }
    }

    #[test]
    fn ranking_orders_by_similarity() {
        let query = vec![1.0, 0.0];
        let results = rank_candidates(
            &query,
            vec![
                candidate("far", vec![0.0, 1.0]),
                candidate("close", vec![1.0, 0.1]),
                candidate("mid", vec![0.7, 0.7]),
            ],
            10,
        );
        let order: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["close", "mid", "far"]);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let query = vec![1.0, 0.0];
        let results = rank_candidates(
            &query,
            vec![
                candidate("opposite", vec![-1.0, 0.0]),
                candidate("aligned", vec![1.0, 0.0]),
            ],
            10,
        );
        for r in &results {
            assert!(
                (0.0..=1.0).contains(&r.similarity_score),
                "score {} out of range",
                r.similarity_score
            );
        }
        assert_eq!(results[0].chunk_id, "aligned");
        assert_eq!(results[1].similarity_score, 0.0);
    }

    #[test]
    fn truncates_to_max_results() {
        let query = vec![1.0];
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("c{i:02}"), vec![1.0 - i as f32 * 0.01]))
            .collect();
        let results = rank_candidates(&query, candidates, 3);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn ties_break_deterministically() {
        let query = vec![1.0, 0.0];
        let results = rank_candidates(
            &query,
            vec![
                candidate("b", vec![1.0, 0.0]),
                candidate("a", vec![1.0, 0.0]),
            ],
            10,
        );
        assert_eq!(results[0].chunk_id, "a");
    }
}
