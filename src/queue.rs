//! Durable job queue over the relational store.
//!
//! Four logical queues feed the worker pool. Delivery is at-least-once:
//! a claim marks the row with a visibility deadline (`claimed_until`), and
//! a worker that dies simply lets the deadline lapse, after which the row
//! becomes claimable again. Acknowledgment deletes the row; a negative
//! acknowledgment releases it with a backoff delay.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

pub const QUEUE_DOCUMENT_PROCESSING: &str = "document_processing";
pub const QUEUE_BATCH_PROCESSING: &str = "batch_processing";
pub const QUEUE_METADATA_EXTRACTION: &str = "metadata_extraction";
pub const QUEUE_OCR_PROCESSING: &str = "ocr_processing";

/// A claimed delivery. Dropping it without [`ack`]/[`nack`] leaves the row
/// to reappear when the visibility deadline passes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub queue: String,
    pub payload: serde_json::Value,
    /// Delivery attempts including this one.
    pub attempts: i64,
}

pub async fn enqueue(pool: &SqlitePool, queue: &str, payload: &serde_json::Value) -> Result<i64> {
    enqueue_delayed(pool, queue, payload, 0).await
}

pub async fn enqueue_delayed(
    pool: &SqlitePool,
    queue: &str,
    payload: &serde_json::Value,
    delay_secs: i64,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        INSERT INTO queue_jobs (queue, payload_json, enqueued_at, available_at, attempts, acked)
        VALUES (?, ?, ?, ?, 0, 0)
        RETURNING id
        "#,
    )
    .bind(queue)
    .bind(payload.to_string())
    .bind(now)
    .bind(now + delay_secs)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

/// Claim the oldest ready delivery on `queue` for `worker_id`, making it
/// invisible to other workers for `visibility_secs`. The claim is one
/// atomic UPDATE, so exactly one worker owns a delivery at a time.
pub async fn claim(
    pool: &SqlitePool,
    queue: &str,
    worker_id: &str,
    visibility_secs: i64,
) -> Result<Option<Delivery>> {
    let now = chrono::Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        UPDATE queue_jobs
        SET claimed_by = ?, claimed_until = ?, attempts = attempts + 1
        WHERE id = (
            SELECT id FROM queue_jobs
            WHERE queue = ? AND acked = 0
              AND available_at <= ?
              AND (claimed_until IS NULL OR claimed_until < ?)
            ORDER BY id
            LIMIT 1
        )
        RETURNING id, queue, payload_json, attempts
        "#,
    )
    .bind(worker_id)
    .bind(now + visibility_secs)
    .bind(queue)
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(row) => {
            let payload_json: String = row.get("payload_json");
            Some(Delivery {
                id: row.get("id"),
                queue: row.get("queue"),
                payload: serde_json::from_str(&payload_json)?,
                attempts: row.get("attempts"),
            })
        }
        None => None,
    })
}

/// Acknowledge a completed delivery. The row is gone afterwards.
pub async fn ack(pool: &SqlitePool, delivery_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM queue_jobs WHERE id = ?")
        .bind(delivery_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a delivery for retry after `delay_secs`.
pub async fn nack(pool: &SqlitePool, delivery_id: i64, delay_secs: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE queue_jobs SET claimed_by = NULL, claimed_until = NULL, available_at = ? WHERE id = ?",
    )
    .bind(now + delay_secs)
    .bind(delivery_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Best-effort removal of an unclaimed delivery for a cancelled job. The
/// worker still re-checks job status on dequeue, so a missed removal is
/// harmless.
pub async fn remove_pending_for_job(pool: &SqlitePool, queue: &str, job_id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM queue_jobs
        WHERE queue = ? AND acked = 0 AND claimed_until IS NULL
          AND json_extract(payload_json, '$.job_id') = ?
        "#,
    )
    .bind(queue)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Deliveries ready or in flight on a queue; used by health reporting.
pub async fn depth(pool: &SqlitePool, queue: &str) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE queue = ? AND acked = 0")
            .bind(queue)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
