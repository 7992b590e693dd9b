//! Document storage.
//!
//! Documents are created by the ingestion worker on successful parse and
//! are immutable apart from reprocessing, which replaces every derived
//! field in one transaction. Deletion cascades to chunks and vectors in the
//! same transaction; job rows survive as historical audit.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::extract::ExtractedDocument;
use crate::models::Document;

const DOCUMENT_COLUMNS: &str = "id, filename, file_path, owner_id, doi, title, authors_json, abstract_text, sections_json, tables_json, figures_json, references_json, ocr_applied, page_count, batch_id, uploaded_at";

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    let authors_json: String = row.get("authors_json");
    let sections_json: String = row.get("sections_json");
    let tables_json: String = row.get("tables_json");
    let figures_json: String = row.get("figures_json");
    let references_json: String = row.get("references_json");
    Document {
        id: row.get("id"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        owner_id: row.get("owner_id"),
        doi: row.get("doi"),
        title: row.get("title"),
        authors: serde_json::from_str(&authors_json).unwrap_or_default(),
        abstract_text: row.get("abstract_text"),
        sections: serde_json::from_str(&sections_json).unwrap_or(serde_json::json!({})),
        tables: serde_json::from_str(&tables_json).unwrap_or(serde_json::json!([])),
        figures: serde_json::from_str(&figures_json).unwrap_or(serde_json::json!([])),
        references: serde_json::from_str(&references_json).unwrap_or(serde_json::json!([])),
        ocr_applied: row.get::<i64, _>("ocr_applied") != 0,
        page_count: row.get("page_count"),
        batch_id: row.get("batch_id"),
        uploaded_at: row.get("uploaded_at"),
    }
}

pub struct PersistInput<'a> {
    pub filename: &'a str,
    pub file_path: &'a str,
    pub owner_id: &'a str,
    pub doi: Option<&'a str>,
    pub extracted: &'a ExtractedDocument,
    pub ocr_applied: bool,
    pub batch_id: Option<&'a str>,
}

pub async fn insert(pool: &SqlitePool, input: PersistInput<'_>) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        INSERT INTO documents (filename, file_path, owner_id, doi, title, authors_json, abstract_text,
                               sections_json, tables_json, figures_json, references_json,
                               ocr_applied, page_count, batch_id, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(input.filename)
    .bind(input.file_path)
    .bind(input.owner_id)
    .bind(input.doi)
    .bind(&input.extracted.title)
    .bind(serde_json::to_string(&input.extracted.authors)?)
    .bind(&input.extracted.abstract_text)
    .bind(serde_json::to_string(&input.extracted.sections)?)
    .bind(serde_json::to_string(&input.extracted.tables)?)
    .bind(serde_json::to_string(&input.extracted.figures)?)
    .bind(serde_json::to_string(&input.extracted.references)?)
    .bind(input.ocr_applied as i64)
    .bind(input.extracted.page_count as i64)
    .bind(input.batch_id)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Reprocessing: swap every derived field in one transaction, keeping the
/// document id, owner, filename, and upload timestamp.
pub async fn replace_derived(
    pool: &SqlitePool,
    document_id: i64,
    doi: Option<&str>,
    extracted: &ExtractedDocument,
    ocr_applied: bool,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET doi = ?, title = ?, authors_json = ?, abstract_text = ?, sections_json = ?,
            tables_json = ?, figures_json = ?, references_json = ?, ocr_applied = ?, page_count = ?
        WHERE id = ?
        "#,
    )
    .bind(doi)
    .bind(&extracted.title)
    .bind(serde_json::to_string(&extracted.authors)?)
    .bind(&extracted.abstract_text)
    .bind(serde_json::to_string(&extracted.sections)?)
    .bind(serde_json::to_string(&extracted.tables)?)
    .bind(serde_json::to_string(&extracted.figures)?)
    .bind(serde_json::to_string(&extracted.references)?)
    .bind(ocr_applied as i64)
    .bind(extracted.page_count as i64)
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
    let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(document_from_row))
}

pub async fn list_for_owner(
    pool: &SqlitePool,
    owner_id: &str,
    skip: i64,
    limit: i64,
) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE owner_id = ? ORDER BY uploaded_at DESC LIMIT ? OFFSET ?"
    ))
    .bind(owner_id)
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(document_from_row).collect())
}

/// Delete a document together with its chunks and vectors. Job rows keep
/// their `document_id` as audit of what they produced.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}
