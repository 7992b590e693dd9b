//! Integration tests for the relational store: job lifecycle, step audit,
//! queue delivery semantics, batches, and chunk cascade on delete.

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tempfile::TempDir;

use paperstack::config::{Config, DbConfig};
use paperstack::extract::ExtractedDocument;
use paperstack::models::{JobStatus, Role, StepStatus};
use paperstack::users::NewUser;
use paperstack::{db, documents, jobs, migrate, queue, users, vector};

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("test.sqlite"),
            pool_size: 2,
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
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

async fn make_user(pool: &SqlitePool, email: &str) -> String {
    users::create(
        pool,
        NewUser {
            email,
            password: "Sup3rSecret",
            full_name: "Test User",
            organization: None,
            role: Role::User,
        },
    )
    .await
    .unwrap()
    .expect("user created")
    .id
}

fn sample_extracted() -> ExtractedDocument {
    let mut sections = BTreeMap::new();
    sections.insert("introduction".to_string(), "Intro body.".to_string());
    sections.insert("results".to_string(), "Results body.".to_string());
    ExtractedDocument {
        full_text: "Intro body.\nResults body.".to_string(),
        page_count: 2,
        title: Some("A Paper".to_string()),
        authors: vec!["A. Author".to_string()],
        abstract_text: Some("The abstract.".to_string()),
        sections,
        tables: Vec::new(),
        figures: Vec::new(),
        references: vec!["[1] Prior work.".to_string()],
    }
}

async fn make_document(pool: &SqlitePool, owner_id: &str) -> i64 {
    documents::insert(
        pool,
        documents::PersistInput {
            filename: "paper.pdf",
            file_path: "/tmp/paper.pdf",
            owner_id,
            doi: None,
            extracted: &sample_extracted(),
            ocr_applied: false,
            batch_id: None,
        },
    )
    .await
    .unwrap()
}

// ============ Users ============

#[tokio::test]
async fn email_uniqueness_is_case_insensitive() {
    let (_tmp, pool) = setup().await;
    make_user(&pool, "alice@example.com").await;

    let duplicate = users::create(
        &pool,
        NewUser {
            email: "ALICE@example.com",
            password: "Sup3rSecret",
            full_name: "Shouty Alice",
            organization: None,
            role: Role::User,
        },
    )
    .await
    .unwrap();
    assert!(duplicate.is_none(), "case-variant duplicate must be rejected");

    let found = users::find_by_email(&pool, "Alice@Example.Com")
        .await
        .unwrap();
    assert!(found.is_some());
}

// ============ Jobs ============

#[tokio::test]
async fn job_lifecycle_happy_path() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;

    let job = jobs::create(&pool, &owner, "paper.pdf", 1234, None, serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);

    assert!(jobs::mark_processing(&pool, &job.id).await.unwrap());
    jobs::set_progress(&pool, &job.id, 50).await.unwrap();

    let doc_id = make_document(&pool, &owner).await;
    assert!(jobs::complete(&pool, &job.id, doc_id).await.unwrap());

    let done = jobs::find(&pool, &job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    // Completed implies the referenced document exists.
    let referenced = documents::find(&pool, done.document_id.unwrap())
        .await
        .unwrap();
    assert!(referenced.is_some());
}

#[tokio::test]
async fn illegal_transitions_are_rejected() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;
    let doc_id = make_document(&pool, &owner).await;

    // Completing a pending job skips processing; the guard refuses.
    let job = jobs::create(&pool, &owner, "a.pdf", 1, None, serde_json::json!({}))
        .await
        .unwrap();
    assert!(!jobs::complete(&pool, &job.id, doc_id).await.unwrap());

    // Terminal states cannot be cancelled.
    assert!(jobs::mark_processing(&pool, &job.id).await.unwrap());
    assert!(jobs::fail(&pool, &job.id, "boom").await.unwrap());
    assert!(!jobs::cancel(&pool, &job.id).await.unwrap());

    let failed = jobs::find(&pool, &job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 100);
    assert_eq!(failed.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn redelivered_job_can_reenter_processing() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;
    let job = jobs::create(&pool, &owner, "a.pdf", 1, None, serde_json::json!({}))
        .await
        .unwrap();

    assert!(jobs::mark_processing(&pool, &job.id).await.unwrap());
    let first = jobs::find(&pool, &job.id).await.unwrap().unwrap();

    // A second worker picking up the redelivery re-enters processing
    // without resetting started_at.
    assert!(jobs::mark_processing(&pool, &job.id).await.unwrap());
    let second = jobs::find(&pool, &job.id).await.unwrap().unwrap();
    assert_eq!(first.started_at, second.started_at);

    // Attaching the produced document lets the redelivery find it.
    let doc_id = make_document(&pool, &owner).await;
    jobs::attach_document(&pool, &job.id, doc_id).await.unwrap();
    let attached = jobs::find(&pool, &job.id).await.unwrap().unwrap();
    assert_eq!(attached.document_id, Some(doc_id));
}

#[tokio::test]
async fn steps_append_with_monotonic_indices() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;
    let job = jobs::create(&pool, &owner, "a.pdf", 1, None, serde_json::json!({}))
        .await
        .unwrap();

    for (name, status) in [
        ("extract_text", StepStatus::Completed),
        ("ocr_check", StepStatus::Completed),
        ("doi_extract", StepStatus::Failed),
    ] {
        jobs::record_step(&pool, &job.id, name, status, "msg", serde_json::json!({}), 5)
            .await
            .unwrap();
    }

    let steps = jobs::steps(&pool, &job.id).await.unwrap();
    assert_eq!(steps.len(), 3);
    for (n, step) in steps.iter().enumerate() {
        assert_eq!(step.step_index, n as i64);
    }
    assert_eq!(steps[0].step_name, "extract_text");
    assert_eq!(steps[2].status, StepStatus::Failed);
}

// ============ Batches ============

#[tokio::test]
async fn batch_status_tracks_children() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;

    let first = jobs::create(&pool, &owner, "a.pdf", 1, Some("batch-1"), serde_json::json!({}))
        .await
        .unwrap();
    let second = jobs::create(&pool, &owner, "b.pdf", 1, Some("batch-1"), serde_json::json!({}))
        .await
        .unwrap();

    let batch = jobs::find_batch(&pool, &owner, "batch-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.total, 2);
    assert_eq!(batch.status, JobStatus::Pending);

    jobs::mark_processing(&pool, &first.id).await.unwrap();
    let batch = jobs::find_batch(&pool, &owner, "batch-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, JobStatus::Processing);

    let doc_id = make_document(&pool, &owner).await;
    jobs::complete(&pool, &first.id, doc_id).await.unwrap();
    jobs::mark_processing(&pool, &second.id).await.unwrap();
    jobs::fail(&pool, &second.id, "nope").await.unwrap();

    let batch = jobs::find_batch(&pool, &owner, "batch-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, JobStatus::Failed);
    assert_eq!(batch.completed, 1);
    assert_eq!(batch.failed, 1);

    // Other users see no trace of this batch.
    let other = make_user(&pool, "other@example.com").await;
    assert!(jobs::find_batch(&pool, &other, "batch-1")
        .await
        .unwrap()
        .is_none());
}

// ============ Queue ============

#[tokio::test]
async fn queue_claim_is_exclusive_until_visibility_lapses() {
    let (_tmp, pool) = setup().await;

    queue::enqueue(
        &pool,
        queue::QUEUE_DOCUMENT_PROCESSING,
        &serde_json::json!({ "job_id": "j1" }),
    )
    .await
    .unwrap();

    let first = queue::claim(&pool, queue::QUEUE_DOCUMENT_PROCESSING, "w1", 3600)
        .await
        .unwrap()
        .expect("first claim succeeds");
    assert_eq!(first.attempts, 1);
    assert_eq!(first.payload["job_id"], "j1");

    // Still claimed: a second worker gets nothing.
    let second = queue::claim(&pool, queue::QUEUE_DOCUMENT_PROCESSING, "w2", 3600)
        .await
        .unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn queue_redelivers_after_visibility_timeout() {
    let (_tmp, pool) = setup().await;

    queue::enqueue(
        &pool,
        queue::QUEUE_DOCUMENT_PROCESSING,
        &serde_json::json!({ "job_id": "j1" }),
    )
    .await
    .unwrap();

    // Claim with an already-lapsed visibility window (dead worker).
    let first = queue::claim(&pool, queue::QUEUE_DOCUMENT_PROCESSING, "w1", -1)
        .await
        .unwrap()
        .expect("claim");
    assert_eq!(first.attempts, 1);

    let second = queue::claim(&pool, queue::QUEUE_DOCUMENT_PROCESSING, "w2", 3600)
        .await
        .unwrap()
        .expect("redelivery after lapse");
    assert_eq!(second.attempts, 2);
    assert_eq!(second.id, first.id);
}

#[tokio::test]
async fn queue_ack_and_nack() {
    let (_tmp, pool) = setup().await;

    queue::enqueue(
        &pool,
        queue::QUEUE_OCR_PROCESSING,
        &serde_json::json!({ "job_id": "j9" }),
    )
    .await
    .unwrap();

    let delivery = queue::claim(&pool, queue::QUEUE_OCR_PROCESSING, "w1", 3600)
        .await
        .unwrap()
        .unwrap();

    // Nack with no delay: immediately claimable again.
    queue::nack(&pool, delivery.id, 0).await.unwrap();
    let redelivered = queue::claim(&pool, queue::QUEUE_OCR_PROCESSING, "w1", 3600)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redelivered.attempts, 2);

    queue::ack(&pool, redelivered.id).await.unwrap();
    assert_eq!(queue::depth(&pool, queue::QUEUE_OCR_PROCESSING).await.unwrap(), 0);
    assert!(queue::claim(&pool, queue::QUEUE_OCR_PROCESSING, "w1", 3600)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn queue_backoff_delays_redelivery() {
    let (_tmp, pool) = setup().await;

    queue::enqueue(
        &pool,
        queue::QUEUE_BATCH_PROCESSING,
        &serde_json::json!({ "job_id": "j2" }),
    )
    .await
    .unwrap();
    let delivery = queue::claim(&pool, queue::QUEUE_BATCH_PROCESSING, "w1", 3600)
        .await
        .unwrap()
        .unwrap();

    // Nack with a 60s delay: not yet available.
    queue::nack(&pool, delivery.id, 60).await.unwrap();
    assert!(queue::claim(&pool, queue::QUEUE_BATCH_PROCESSING, "w1", 3600)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn pending_delivery_removed_on_cancel() {
    let (_tmp, pool) = setup().await;

    queue::enqueue(
        &pool,
        queue::QUEUE_DOCUMENT_PROCESSING,
        &serde_json::json!({ "kind": "process_document", "job_id": "j3" }),
    )
    .await
    .unwrap();

    let removed = queue::remove_pending_for_job(&pool, queue::QUEUE_DOCUMENT_PROCESSING, "j3")
        .await
        .unwrap();
    assert!(removed);
    assert_eq!(
        queue::depth(&pool, queue::QUEUE_DOCUMENT_PROCESSING).await.unwrap(),
        0
    );

    // Unknown job id removes nothing.
    let removed = queue::remove_pending_for_job(&pool, queue::QUEUE_DOCUMENT_PROCESSING, "jX")
        .await
        .unwrap();
    assert!(!removed);
}

// ============ Documents and chunk cascade ============

#[tokio::test]
async fn document_roundtrip_and_reprocess_keeps_id() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;
    let doc_id = make_document(&pool, &owner).await;

    let doc = documents::find(&pool, doc_id).await.unwrap().unwrap();
    assert_eq!(doc.title.as_deref(), Some("A Paper"));
    assert_eq!(doc.page_count, 2);
    assert!(doc.sections.get("introduction").is_some());

    // Reprocess replaces derived fields under the same id.
    let mut updated = sample_extracted();
    updated.title = Some("A Better Title".to_string());
    updated
        .sections
        .insert("conclusion".to_string(), "New conclusion.".to_string());
    assert!(
        documents::replace_derived(&pool, doc_id, Some("10.1234/abcd"), &updated, true)
            .await
            .unwrap()
    );

    let doc = documents::find(&pool, doc_id).await.unwrap().unwrap();
    assert_eq!(doc.id, doc_id);
    assert_eq!(doc.title.as_deref(), Some("A Better Title"));
    assert_eq!(doc.doi.as_deref(), Some("10.1234/abcd"));
    assert!(doc.ocr_applied);
    assert!(doc.sections.get("conclusion").is_some());
}

#[tokio::test]
async fn delete_cascades_to_chunks_and_vectors() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;
    let doc_id = make_document(&pool, &owner).await;

    // Seed chunks and vectors directly; embedding providers are not
    // exercised here.
    for n in 0..3i64 {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, section, kind, created_at)
             VALUES (?, ?, ?, ?, 'introduction', 'text', 0)",
        )
        .bind(format!("chunk-{n}"))
        .bind(doc_id)
        .bind(n)
        .bind(format!("chunk text {n}"))
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, document_id, embedding, dims, model, created_at)
             VALUES (?, ?, ?, 2, 'test-model', 0)",
        )
        .bind(format!("chunk-{n}"))
        .bind(doc_id)
        .bind(vec![0u8; 8])
        .execute(&pool)
        .await
        .unwrap();
    }

    assert!(documents::delete(&pool, doc_id).await.unwrap());

    let chunk_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    let vector_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE document_id = ?")
            .bind(doc_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(chunk_count, 0);
    assert_eq!(vector_count, 0);
    assert!(documents::find(&pool, doc_id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_chunks_leaves_document_intact() {
    let (_tmp, pool) = setup().await;
    let owner = make_user(&pool, "owner@example.com").await;
    let doc_id = make_document(&pool, &owner).await;

    sqlx::query(
        "INSERT INTO chunks (id, document_id, chunk_index, text, kind, created_at)
         VALUES ('c0', ?, 0, 'text', 'text', 0)",
    )
    .bind(doc_id)
    .execute(&pool)
    .await
    .unwrap();

    let deleted = vector::delete_chunks(&pool, doc_id).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(documents::find(&pool, doc_id).await.unwrap().is_some());
}
