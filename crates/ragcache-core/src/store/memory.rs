//! In-memory store for tests and embedded use.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity; keyword search counts matching query terms.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{CacheEntry, Chunk, ChunkState};

use super::{is_expired, CacheStore, ChunkCounts, ChunkHit, ChunkStore, DEFAULT_CACHE_TTL_SECS};

/// In-memory chunk and cache store.
pub struct InMemoryStore {
    chunks: RwLock<Vec<Chunk>>,
    cache: RwLock<Vec<CacheEntry>>,
    cache_ttl_secs: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_cache_ttl(DEFAULT_CACHE_TTL_SECS)
    }

    pub fn with_cache_ttl(cache_ttl_secs: i64) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            cache: RwLock::new(Vec::new()),
            cache_ttl_secs,
        }
    }

    fn live(&self, entry: &CacheEntry, now: i64) -> bool {
        !is_expired(entry.created_at, self.cache_ttl_secs, now)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn term_matches(text: &str, terms: &[String]) -> usize {
    let text_lower = text.to_lowercase();
    terms.iter().filter(|t| text_lower.contains(t.as_str())).count()
}

fn sort_hits(hits: &mut [ChunkHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn mark_superseded(&self, id: &str, by: &str) -> Result<bool> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        match stored.iter_mut().find(|c| c.id == id) {
            Some(c) if c.is_active() => {
                c.state = ChunkState::Superseded { by: by.to_string() };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored.iter().find(|c| c.id == id).cloned())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        _num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut hits: Vec<ChunkHit> = stored
            .iter()
            .filter(|c| c.is_active())
            .filter_map(|c| {
                let sim = cosine_similarity(query_vec, &c.embedding).ok()?;
                Some(ChunkHit {
                    chunk: c.clone(),
                    score: sim as f64,
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.chunks.read().map_err(poisoned)?;
        let mut hits: Vec<ChunkHit> = stored
            .iter()
            .filter(|c| c.is_active())
            .filter_map(|c| {
                let matches = term_matches(&c.text, &terms);
                (matches > 0).then(|| ChunkHit {
                    chunk: c.clone(),
                    score: matches as f64,
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count_chunks(&self) -> Result<ChunkCounts> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let active = stored.iter().filter(|c| c.is_active()).count() as u64;
        Ok(ChunkCounts {
            active,
            superseded: stored.len() as u64 - active,
        })
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn find_exact(&self, query: &str) -> Result<Option<CacheEntry>> {
        let now = chrono::Utc::now().timestamp();
        let cache = self.cache.read().map_err(poisoned)?;
        Ok(cache
            .iter()
            .rev()
            .find(|e| e.query == query && self.live(e, now))
            .cloned())
    }

    async fn cache_entries(&self) -> Result<Vec<CacheEntry>> {
        let now = chrono::Utc::now().timestamp();
        let cache = self.cache.read().map_err(poisoned)?;
        Ok(cache.iter().filter(|e| self.live(e, now)).cloned().collect())
    }

    async fn touch_entry(&self, id: &str) -> Result<()> {
        let mut cache = self.cache.write().map_err(poisoned)?;
        if let Some(e) = cache.iter_mut().find(|e| e.id == id) {
            e.last_accessed = chrono::Utc::now().timestamp();
        }
        Ok(())
    }

    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut cache = self.cache.write().map_err(poisoned)?;
        let ttl = self.cache_ttl_secs;
        cache.retain(|e| !is_expired(e.created_at, ttl, now));
        cache.push(entry.clone());
        Ok(())
    }

    async fn clear_cache(&self) -> Result<u64> {
        let mut cache = self.cache.write().map_err(poisoned)?;
        let n = cache.len() as u64;
        cache.clear();
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_superseded_excluded_from_search() {
        let store = InMemoryStore::new();
        let a = Chunk::new("weekly sessions on tuesdays", vec![1.0, 0.0]);
        let b = Chunk::new("weekly sessions on tuesdays at noon", vec![0.9, 0.1]);
        store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();

        assert!(store.mark_superseded(&a.id, &b.id).await.unwrap());
        assert!(!store.mark_superseded(&a.id, "other").await.unwrap());

        let hits = store.vector_search(&[1.0, 0.0], 100, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, b.id);

        let hits = store.keyword_search("tuesdays", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, b.id);

        let kept = store.get_chunk(&a.id).await.unwrap().unwrap();
        assert_eq!(kept.superseded_by(), Some(b.id.as_str()));
        assert_eq!(
            store.count_chunks().await.unwrap(),
            ChunkCounts {
                active: 1,
                superseded: 1
            }
        );
    }

    #[tokio::test]
    async fn test_keyword_search_ranks_by_term_count() {
        let store = InMemoryStore::new();
        let one = Chunk::new("dev division", vec![1.0]);
        let two = Chunk::new("dev division meets on tuesdays", vec![1.0]);
        store.insert_chunks(&[one.clone(), two.clone()]).await.unwrap();

        let hits = store.keyword_search("When does the Dev division meet on Tuesdays?", 10).await.unwrap();
        assert_eq!(hits[0].chunk.id, two.id);
        assert!(hits[0].score > hits[1].score);
        assert!(store.keyword_search("?!", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_ttl_hides_expired_entries() {
        let store = InMemoryStore::with_cache_ttl(60);
        let mut old = CacheEntry::new("q", Some(vec![1.0]), "old answer");
        old.created_at -= 61;
        store.insert_entry(&old).await.unwrap();
        assert!(store.find_exact("q").await.unwrap().is_none());
        assert!(store.cache_entries().await.unwrap().is_empty());

        let fresh = CacheEntry::new("q", Some(vec![1.0]), "new answer");
        store.insert_entry(&fresh).await.unwrap();
        assert_eq!(store.find_exact("q").await.unwrap().unwrap().answer, "new answer");
        assert_eq!(store.clear_cache().await.unwrap(), 1);
    }
}
