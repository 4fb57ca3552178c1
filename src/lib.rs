//! # ragcache
//!
//! A retrieval-augmented answering backend: ingested text is chunked,
//! embedded, and stored with near-duplicate supersession; questions are
//! answered from hybrid (vector + keyword) retrieval through an LLM, with a
//! two-tier (exact + semantic) answer cache in front.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────┐   ┌───────────┐
//! │ HTTP/CLI │──▶│ RagEngine (core)    │──▶│  SQLite   │
//! └──────────┘   │ chunk·dedup·search· │   │ FTS5+BLOB │
//!                │ answer cache        │   └───────────┘
//!                └──────┬───────┬──────┘
//!                       ▼       ▼
//!                   Voyage    Gemini
//! ```
//!
//! The pipeline itself lives in `ragcache-core`; this crate supplies the
//! SQLite store, provider clients, configuration, HTTP server, and CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite chunk and cache store |
//! | [`rate_limit`] | Provider call spacing |
//! | [`embedding`] | Voyage embedding client with retry |
//! | [`generate`] | Gemini answer generation |
//! | [`tokenizer`] | Chunker construction |
//! | [`engine`] | Pipeline wiring |
//! | [`feedback`] | Feedback collection |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI commands |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod feedback;
pub mod generate;
pub mod migrate;
pub mod rate_limit;
pub mod server;
pub mod sqlite_store;
pub mod tokenizer;

pub use ragcache_core;
