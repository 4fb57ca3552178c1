//! Core data models shared by the ingest and query pipelines.
//!
//! [`Chunk`]s are owned by the document store and [`CacheEntry`]s by the
//! answer cache. Neither is mutated across components: the only change a
//! chunk ever sees is the single `Active → Superseded` transition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a stored chunk.
///
/// A chunk starts `Active` and moves to `Superseded` at most once, when a
/// newer near-duplicate chunk replaces it. Superseded chunks are kept for
/// auditing but excluded from every search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChunkState {
    Active,
    Superseded { by: String },
}

/// A span of source text plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Unix seconds.
    pub created_at: i64,
    pub state: ChunkState,
}

impl Chunk {
    /// Build a new active chunk with a fresh UUID.
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            embedding,
            created_at: chrono::Utc::now().timestamp(),
            state: ChunkState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ChunkState::Active)
    }

    pub fn superseded_by(&self) -> Option<&str> {
        match &self.state {
            ChunkState::Active => None,
            ChunkState::Superseded { by } => Some(by),
        }
    }
}

/// A stored answer, keyed by the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub query: String,
    pub embedding: Option<Vec<f32>>,
    pub answer: String,
    /// Unix seconds. Entries expire `ttl` seconds after this instant.
    pub created_at: i64,
    /// Unix seconds, refreshed on every hit.
    pub last_accessed: i64,
}

impl CacheEntry {
    pub fn new(query: impl Into<String>, embedding: Option<Vec<f32>>, answer: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            embedding,
            answer: answer.into(),
            created_at: now,
            last_accessed: now,
        }
    }
}

/// Raw chunk material arriving at the ingest boundary.
///
/// Decoded once by [`crate::chunk::normalize_chunks`]; everything past
/// ingest works on plain trimmed strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ChunkInput {
    Text(String),
    Binary(Vec<u8>),
    Structured {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
}

impl From<String> for ChunkInput {
    fn from(s: String) -> Self {
        ChunkInput::Text(s)
    }
}

impl From<&str> for ChunkInput {
    fn from(s: &str) -> Self {
        ChunkInput::Text(s.to_string())
    }
}
