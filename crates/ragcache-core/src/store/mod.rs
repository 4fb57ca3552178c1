//! Storage abstraction for ragcache.
//!
//! Two traits split ownership the way the pipeline does: [`ChunkStore`]
//! owns the knowledge base, [`CacheStore`] owns generated answers. A single
//! backend may implement both (both shipped backends do).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CacheEntry, Chunk};

/// Default cache time-to-live: 24 hours.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 24 * 60 * 60;

/// A chunk returned from a search, with the backend's raw relevance score.
///
/// For vector search the score is cosine similarity; for keyword search it
/// is the backend's full-text relevance (higher is better).
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Chunk counts by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub active: u64,
    pub superseded: u64,
}

/// Persisted collection of chunks with embeddings and supersession links.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunks`](ChunkStore::insert_chunks) | Insert many chunks |
/// | [`mark_superseded`](ChunkStore::mark_superseded) | One-time `Active → Superseded` transition |
/// | [`get_chunk`](ChunkStore::get_chunk) | Fetch a chunk by ID, in any state |
/// | [`vector_search`](ChunkStore::vector_search) | Nearest active chunks by cosine similarity |
/// | [`keyword_search`](ChunkStore::keyword_search) | Full-text relevance over active chunks |
/// | [`count_chunks`](ChunkStore::count_chunks) | Active/superseded totals |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Mark `id` as superseded by `by`.
    ///
    /// Returns `false` without changing anything if `id` does not exist or
    /// is already superseded.
    async fn mark_superseded(&self, id: &str, by: &str) -> Result<bool>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Nearest active chunks to `query_vec`, best first.
    ///
    /// `num_candidates` bounds the breadth an approximate index explores;
    /// exact backends may treat it as a hint.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    /// Active chunks matching `query` by full-text relevance, best first.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    async fn count_chunks(&self) -> Result<ChunkCounts>;
}

/// Persisted answer cache with store-level expiry.
///
/// Every read excludes entries created more than the store's TTL ago; the
/// cache logic never checks expiry itself.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Most recent live entry whose query equals `query` verbatim.
    async fn find_exact(&self, query: &str) -> Result<Option<CacheEntry>>;

    /// All live entries.
    async fn cache_entries(&self) -> Result<Vec<CacheEntry>>;

    /// Refresh `last_accessed` on an entry.
    async fn touch_entry(&self, id: &str) -> Result<()>;

    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()>;

    /// Delete every entry, returning how many were removed.
    async fn clear_cache(&self) -> Result<u64>;
}

/// `true` if an entry created at `created_at` has outlived `ttl_secs` at `now`.
pub fn is_expired(created_at: i64, ttl_secs: i64, now: i64) -> bool {
    now - created_at >= ttl_secs
}
