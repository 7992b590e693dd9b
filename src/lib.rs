//! # paperstack
//!
//! Server-side core of a research-paper analysis platform: a cluster of
//! cooperating services that ingest PDFs, extract structured content, index
//! chunks into a vector store, and serve authenticated search, analysis,
//! and chat through a unified gateway.
//!
//! ## Architecture
//!
//! ```text
//! Client → Gateway → Document Service → Queue → Worker Pool
//!              │                                   │
//!              ├→ Vector Service ←─ chunk/embed ───┘
//!              └→ LLM Providers (external)
//! ```
//!
//! Every component is a subcommand of the `pstack` binary sharing one
//! SQLite store and one TOML configuration file.
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — typed records: users, credentials, documents, jobs, chunks
//! - [`db`] / [`migrate`] — SQLite pool and idempotent schema
//! - [`httpapi`] — shared error envelope for all HTTP services
//! - [`auth`] / [`users`] — identity core: passwords, tokens, API credentials
//! - [`kv`] / [`ratelimit`] — ephemeral counters and token blacklist
//! - [`extract`] / [`sections`] / [`ocr`] / [`doi`] — ingestion collaborators
//! - [`chunk`] / [`embedding`] / [`vector`] — vector index internals
//! - [`queue`] / [`jobs`] / [`worker`] — broker, job records, worker pool
//! - [`docserver`] / [`vecserver`] / [`gateway`] — the three HTTP services
//! - [`llm`] — completion providers and prompt composition
//! - [`stats`] — operator corpus statistics

pub mod auth;
pub mod chunk;
pub mod config;
pub mod db;
pub mod docserver;
pub mod documents;
pub mod doi;
pub mod embedding;
pub mod extract;
pub mod gateway;
pub mod httpapi;
pub mod jobs;
pub mod kv;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod queue;
pub mod ratelimit;
pub mod sections;
pub mod stats;
pub mod users;
pub mod vecserver;
pub mod vector;
pub mod worker;
