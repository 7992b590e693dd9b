//! Corpus statistics snapshot.
//!
//! Quick operator view of what the cluster holds: user, document, chunk,
//! and embedding counts, job states, and queue depths. Used by
//! `pstack stats` to confirm that ingestion and indexing are keeping up.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::{db, queue};

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await?;
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("paperstack — Corpus Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Users:       {}", users);
    println!("  Documents:   {}", documents);
    println!("  Chunks:      {}", chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        vectors,
        chunks,
        if chunks > 0 { (vectors * 100) / chunks } else { 0 }
    );

    let job_rows = sqlx::query(
        "SELECT status, COUNT(*) AS count FROM jobs GROUP BY status ORDER BY count DESC",
    )
    .fetch_all(&pool)
    .await?;

    if !job_rows.is_empty() {
        println!();
        println!("  Jobs:");
        for row in &job_rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            println!("    {:<12} {}", status, count);
        }
    }

    println!();
    println!("  Queues:");
    for queue_name in [
        queue::QUEUE_DOCUMENT_PROCESSING,
        queue::QUEUE_BATCH_PROCESSING,
        queue::QUEUE_METADATA_EXTRACTION,
        queue::QUEUE_OCR_PROCESSING,
    ] {
        let depth = queue::depth(&pool, queue_name).await?;
        println!("    {:<24} {}", queue_name, depth);
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
