//! # ragcache core
//!
//! Shared, runtime-agnostic logic for ragcache: data models, chunking,
//! vector utilities, store abstraction, near-duplicate supersession,
//! hybrid retrieval, and the two-tier answer cache.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Providers (embedding, generation) and persistent stores are plugged in
//! through the [`embedding::Embedder`], [`generate::Generator`],
//! [`store::ChunkStore`], and [`store::CacheStore`] traits.

pub mod cache;
pub mod chunk;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod models;
pub mod rag;
pub mod search;
pub mod store;

pub use error::ValidationError;
pub use rag::{IngestOutcome, QueryOutcome, RagEngine};
