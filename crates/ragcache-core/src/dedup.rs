//! Near-duplicate supersession on ingest.
//!
//! Each newly embedded chunk is compared against the closest existing
//! active chunks. The first one at or above the similarity threshold is
//! marked as superseded by the new chunk. New data is never dropped: the
//! new chunk is always inserted, and insertion happens before linking so
//! the replacing ID exists when the old chunk points at it.
//!
//! Processing is sequential per chunk (search, insert, link), so a chunk
//! can also supersede an earlier chunk from the same ingest batch.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::embedding::cosine_similarity;
use crate::models::Chunk;
use crate::store::ChunkStore;

/// Tuning for near-duplicate detection.
#[derive(Debug, Clone)]
pub struct DedupParams {
    /// Minimum exact cosine similarity to supersede an existing chunk.
    pub threshold: f32,
    /// Number of nearest chunks to re-score.
    pub limit: usize,
    /// Breadth hint passed to the store's vector search.
    pub num_candidates: usize,
}

impl Default for DedupParams {
    fn default() -> Self {
        Self {
            threshold: 0.90,
            limit: 3,
            num_candidates: 100,
        }
    }
}

/// Counts reported back to the ingest caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub inserted: usize,
    pub superseded: usize,
}

/// Find the existing chunk that `new_embedding` should supersede, if any.
///
/// Candidates are scanned in the order the store returned them (not
/// re-sorted by the exact score). A failed search is logged and treated
/// as "no candidate".
pub async fn find_superseded_candidate<S: ChunkStore + ?Sized>(
    store: &S,
    new_embedding: &[f32],
    params: &DedupParams,
) -> Option<String> {
    let candidates = match store
        .vector_search(new_embedding, params.num_candidates, params.limit)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            warn!("dedup similarity search failed, skipping: {e:#}");
            return None;
        }
    };

    for hit in candidates {
        if !hit.chunk.is_active() {
            continue;
        }
        let sim = match cosine_similarity(new_embedding, &hit.chunk.embedding) {
            Ok(s) => s,
            Err(e) => {
                warn!(chunk_id = %hit.chunk.id, "dedup re-score failed: {e}");
                continue;
            }
        };
        debug!(chunk_id = %hit.chunk.id, similarity = sim, "dedup candidate");
        if sim >= params.threshold {
            return Some(hit.chunk.id);
        }
    }
    None
}

/// Insert `chunks` one by one, superseding near-duplicates along the way.
pub async fn insert_with_dedup<S: ChunkStore + ?Sized>(
    store: &S,
    chunks: Vec<Chunk>,
    params: &DedupParams,
) -> Result<DedupStats> {
    let mut stats = DedupStats::default();

    for chunk in chunks {
        let candidate = find_superseded_candidate(store, &chunk.embedding, params).await;

        store.insert_chunks(std::slice::from_ref(&chunk)).await?;
        stats.inserted += 1;

        if let Some(old_id) = candidate {
            if store.mark_superseded(&old_id, &chunk.id).await? {
                info!(old = %old_id, new = %chunk.id, "superseded near-duplicate chunk");
                stats.superseded += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::{ChunkCounts, ChunkHit};
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_near_duplicate_supersedes() {
        let store = InMemoryStore::new();
        let a = Chunk::new("old", vec![1.0, 0.0, 0.0]);
        store.insert_chunks(&[a.clone()]).await.unwrap();

        let b = Chunk::new("new", vec![0.95, 0.05, 0.0]);
        let stats = insert_with_dedup(&store, vec![b.clone()], &DedupParams::default())
            .await
            .unwrap();
        assert_eq!(stats, DedupStats { inserted: 1, superseded: 1 });

        let a_after = store.get_chunk(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.superseded_by(), Some(b.id.as_str()));
        let hits = store.vector_search(&[1.0, 0.0, 0.0], 100, 10).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.id != a.id));
    }

    #[tokio::test]
    async fn test_dissimilar_chunks_untouched() {
        let store = InMemoryStore::new();
        let a = Chunk::new("old", vec![1.0, 0.0]);
        store.insert_chunks(&[a.clone()]).await.unwrap();

        let stats = insert_with_dedup(
            &store,
            vec![Chunk::new("other", vec![0.0, 1.0])],
            &DedupParams::default(),
        )
        .await
        .unwrap();
        assert_eq!(stats, DedupStats { inserted: 1, superseded: 0 });
        assert!(store.get_chunk(&a.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_empty_store_inserts_everything() {
        let store = InMemoryStore::new();
        let chunks = vec![Chunk::new("x", vec![1.0, 0.0]), Chunk::new("y", vec![0.0, 1.0])];
        let stats = insert_with_dedup(&store, chunks, &DedupParams::default())
            .await
            .unwrap();
        assert_eq!(stats, DedupStats { inserted: 2, superseded: 0 });
        assert_eq!(store.count_chunks().await.unwrap().active, 2);
    }

    /// Returns canned hits in a fixed order.
    struct ScriptedStore {
        hits: Vec<ChunkHit>,
        fail_search: bool,
    }

    #[async_trait]
    impl ChunkStore for ScriptedStore {
        async fn insert_chunks(&self, _chunks: &[Chunk]) -> Result<()> {
            Ok(())
        }
        async fn mark_superseded(&self, _id: &str, _by: &str) -> Result<bool> {
            Ok(true)
        }
        async fn get_chunk(&self, _id: &str) -> Result<Option<Chunk>> {
            Ok(None)
        }
        async fn vector_search(&self, _q: &[f32], _n: usize, _l: usize) -> Result<Vec<ChunkHit>> {
            if self.fail_search {
                anyhow::bail!("index unavailable");
            }
            Ok(self.hits.clone())
        }
        async fn keyword_search(&self, _q: &str, _l: usize) -> Result<Vec<ChunkHit>> {
            Ok(Vec::new())
        }
        async fn count_chunks(&self) -> Result<ChunkCounts> {
            Ok(ChunkCounts::default())
        }
    }

    #[tokio::test]
    async fn test_first_qualifying_candidate_in_search_order_wins() {
        let weaker = Chunk::new("weaker", vec![0.92, 0.39]);
        let stronger = Chunk::new("stronger", vec![1.0, 0.0]);
        let store = ScriptedStore {
            // Approximate index returned the weaker match first.
            hits: vec![
                ChunkHit {
                    chunk: weaker.clone(),
                    score: 0.99,
                },
                ChunkHit {
                    chunk: stronger,
                    score: 0.98,
                },
            ],
            fail_search: false,
        };
        let found = find_superseded_candidate(&store, &[1.0, 0.0], &DedupParams::default()).await;
        assert_eq!(found, Some(weaker.id));
    }

    #[tokio::test]
    async fn test_search_failure_is_not_fatal() {
        let store = ScriptedStore {
            hits: Vec::new(),
            fail_search: true,
        };
        let found = find_superseded_candidate(&store, &[1.0], &DedupParams::default()).await;
        assert!(found.is_none());
        let stats = insert_with_dedup(&store, vec![Chunk::new("x", vec![1.0])], &DedupParams::default())
            .await
            .unwrap();
        assert_eq!(stats, DedupStats { inserted: 1, superseded: 0 });
    }
}
