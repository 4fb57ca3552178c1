//! Ingest and query orchestration.
//!
//! ```text
//! ingest: text ─▶ Chunker ─▶ Embedder ─▶ dedup ─▶ ChunkStore ─▶ cache invalidation
//! query:  AnswerCache ─miss─▶ Embedder ─▶ retrieve ─▶ Generator ─▶ AnswerCache admit
//! ```
//!
//! Best-effort side channels (cache lookups and writes, cache invalidation,
//! dedup similarity search) are logged and never fail the request.
//! Provider and store failures on the primary path propagate, and nothing
//! is cached when generation fails.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::cache::{retrieval_confidence, AnswerCache, CacheLookup, CacheParams};
use crate::chunk::{normalize_chunks, Chunker};
use crate::dedup::{insert_with_dedup, DedupParams};
use crate::embedding::Embedder;
use crate::error::ValidationError;
use crate::generate::{user_prompt, Generator, DEFAULT_SYSTEM_PROMPT};
use crate::models::{Chunk, ChunkInput};
use crate::search::{build_context, retrieve, RetrievalParams};
use crate::store::{CacheStore, ChunkStore};

/// Result of a successful ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub chunks_inserted: usize,
    pub superseded_old_chunks: usize,
}

/// Result of a successful query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub query: String,
    pub retrieved_data: Vec<String>,
    pub answer: String,
    pub cached: bool,
    /// Set on cache hits: `true` when served by the similarity tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_cache: Option<bool>,
}

/// Upper bound on texts sent to the embedder in one call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 128;

/// Every tunable of the pipeline in one place.
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub dedup: DedupParams,
    pub retrieval: RetrievalParams,
    pub cache: CacheParams,
    /// Ingest embeds chunks in calls of at most this many texts.
    pub embed_batch_size: usize,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            dedup: DedupParams::default(),
            retrieval: RetrievalParams::default(),
            cache: CacheParams::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

/// The retrieval-augmented answering pipeline over one store.
pub struct RagEngine<S: ?Sized> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    chunker: Chunker,
    cache: AnswerCache<S>,
    dedup: DedupParams,
    retrieval: RetrievalParams,
    embed_batch_size: usize,
    system_prompt: String,
}

impl<S> RagEngine<S>
where
    S: ChunkStore + CacheStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        params: EngineParams,
    ) -> Self {
        let cache = AnswerCache::new(store.clone(), params.cache);
        Self {
            store,
            embedder,
            generator,
            chunker: Chunker::default(),
            cache,
            dedup: params.dedup,
            retrieval: params.retrieval,
            embed_batch_size: params.embed_batch_size.max(1),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Replace the answer cache, e.g. to install a custom classifier.
    pub fn with_cache(mut self, cache: AnswerCache<S>) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &AnswerCache<S> {
        &self.cache
    }

    /// Chunk, embed, deduplicate, and store `text`.
    #[instrument(skip_all, fields(len = text.len()))]
    pub async fn ingest(&self, text: &str) -> Result<IngestOutcome> {
        if text.trim().is_empty() {
            return Err(ValidationError::new("\"text\" field is required").into());
        }
        let inputs = self
            .chunker
            .chunk(text)
            .into_iter()
            .map(ChunkInput::Text)
            .collect();
        self.ingest_chunks(inputs).await
    }

    /// Ingest pre-split chunk material.
    pub async fn ingest_chunks(&self, inputs: Vec<ChunkInput>) -> Result<IngestOutcome> {
        let texts = normalize_chunks(inputs);
        if texts.is_empty() {
            return Err(ValidationError::new("No valid chunks produced from input text").into());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embed_batch_size) {
            let vectors = self
                .embedder
                .embed(batch)
                .await
                .context("Failed to embed chunks")?;
            anyhow::ensure!(
                vectors.len() == batch.len(),
                "Embedding service returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
            embeddings.extend(vectors);
        }

        let chunks: Vec<Chunk> = texts
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| Chunk::new(text, embedding))
            .collect();

        let stats = insert_with_dedup(self.store.as_ref(), chunks, &self.dedup)
            .await
            .context("Failed to store chunks")?;

        self.cache.invalidate().await;

        info!(
            inserted = stats.inserted,
            superseded = stats.superseded,
            "ingest complete"
        );
        Ok(IngestOutcome {
            chunks_inserted: stats.inserted,
            superseded_old_chunks: stats.superseded,
        })
    }

    /// Answer `query`, from cache when possible.
    #[instrument(skip_all)]
    pub async fn query(&self, query: &str) -> Result<QueryOutcome> {
        if query.trim().is_empty() {
            return Err(ValidationError::new("\"query\" field is required").into());
        }

        let query_embedding = match self.cache.lookup(query, self.embedder.as_ref()).await {
            CacheLookup::Hit {
                answer, semantic, ..
            } => {
                return Ok(QueryOutcome {
                    query: query.to_string(),
                    retrieved_data: Vec::new(),
                    answer,
                    cached: true,
                    semantic_cache: Some(semantic),
                });
            }
            CacheLookup::Miss {
                query_embedding: Some(v),
            } => v,
            CacheLookup::Miss {
                query_embedding: None,
            } => self
                .embedder
                .embed_one(query)
                .await
                .context("Failed to embed query")?,
        };

        let retrieved = retrieve(self.store.as_ref(), query, &query_embedding, &self.retrieval)
            .await
            .context("Failed to retrieve context")?;
        let context = build_context(&retrieved);

        let answer = self
            .generator
            .generate(&self.system_prompt, &user_prompt(&context, query))
            .await
            .context("Failed to generate answer")?;

        let confidence = retrieval_confidence(&query_embedding, &retrieved);
        self.cache
            .admit(query, Some(&query_embedding), &answer, confidence)
            .await;

        Ok(QueryOutcome {
            query: query.to_string(),
            retrieved_data: retrieved.into_iter().map(|c| c.text).collect(),
            answer,
            cached: false,
            semantic_cache: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::validation_message;
    use crate::models::CacheEntry;
    use crate::store::memory::InMemoryStore;
    use crate::store::{ChunkCounts, ChunkHit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Bag-of-letters embedding: close texts get close vectors.
    struct LetterEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|s| {
                    let mut v = vec![0.0f32; 26];
                    for b in s.to_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                        v[(b - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct ScriptedGenerator {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            Ok(self.answer.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            anyhow::bail!("generation request failed with status 503")
        }
    }

    /// Working chunk storage whose cache operations all fail.
    struct BrokenCache {
        chunks: InMemoryStore,
    }

    #[async_trait]
    impl ChunkStore for BrokenCache {
        async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
            self.chunks.insert_chunks(chunks).await
        }
        async fn mark_superseded(&self, id: &str, by: &str) -> Result<bool> {
            self.chunks.mark_superseded(id, by).await
        }
        async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
            self.chunks.get_chunk(id).await
        }
        async fn vector_search(
            &self,
            query_vec: &[f32],
            num_candidates: usize,
            limit: usize,
        ) -> Result<Vec<ChunkHit>> {
            self.chunks.vector_search(query_vec, num_candidates, limit).await
        }
        async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
            self.chunks.keyword_search(query, limit).await
        }
        async fn count_chunks(&self) -> Result<ChunkCounts> {
            self.chunks.count_chunks().await
        }
    }

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn find_exact(&self, _query: &str) -> Result<Option<CacheEntry>> {
            anyhow::bail!("cache table is locked")
        }
        async fn cache_entries(&self) -> Result<Vec<CacheEntry>> {
            anyhow::bail!("cache table is locked")
        }
        async fn touch_entry(&self, _id: &str) -> Result<()> {
            anyhow::bail!("cache table is locked")
        }
        async fn insert_entry(&self, _entry: &CacheEntry) -> Result<()> {
            anyhow::bail!("cache table is locked")
        }
        async fn clear_cache(&self) -> Result<u64> {
            anyhow::bail!("cache table is locked")
        }
    }

    fn engine(
        answer: &str,
    ) -> (
        RagEngine<InMemoryStore>,
        Arc<LetterEmbedder>,
        Arc<ScriptedGenerator>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(LetterEmbedder {
            calls: AtomicUsize::new(0),
        });
        let generator = Arc::new(ScriptedGenerator {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let engine = RagEngine::new(
            store,
            embedder.clone(),
            generator.clone(),
            EngineParams::default(),
        );
        (engine, embedder, generator)
    }

    #[tokio::test]
    async fn test_ingest_then_query_then_cached() {
        let (engine, _embedder, generator) = engine("They meet on Tuesdays.");
        let sentence = "CSEC Dev Division holds weekly sessions on Tuesdays.";

        let outcome = engine.ingest(sentence).await.unwrap();
        assert_eq!(outcome.chunks_inserted, 1);
        assert_eq!(outcome.superseded_old_chunks, 0);

        let first = engine.query("When does the Dev division meet?").await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.retrieved_data, vec![sentence.to_string()]);
        assert_eq!(first.semantic_cache, None);
        assert!(generator.prompts.lock().unwrap()[0].contains(sentence));

        let second = engine.query("When does the Dev division meet?").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.semantic_cache, Some(false));
        assert_eq!(second.answer, first.answer);
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_semantic_miss_reuses_query_embedding() {
        let (engine, embedder, _generator) = engine("Tuesdays.");
        engine.ingest("Dev sessions are on Tuesdays.").await.unwrap();
        let before = embedder.calls.load(Ordering::SeqCst);

        engine.query("when?").await.unwrap();
        // One embedding for the semantic tier, reused for retrieval.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_ingest_invalidates_cache() {
        let (engine, _embedder, generator) = engine("Tuesdays.");
        engine.ingest("Dev sessions are on Tuesdays.").await.unwrap();
        engine.query("when?").await.unwrap();
        engine.ingest("Design sessions are on Fridays.").await.unwrap();

        let again = engine.query("when?").await.unwrap();
        assert!(!again.cached);
        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reingest_supersedes_and_hides_old_chunk() {
        let (engine, _embedder, _generator) = engine("ok");
        engine.ingest("Dev sessions are on Tuesdays.").await.unwrap();
        let outcome = engine.ingest("Dev sessions are on Tuesdays!").await.unwrap();
        assert_eq!(outcome.superseded_old_chunks, 1);

        let counts = engine.store().count_chunks().await.unwrap();
        assert_eq!((counts.active, counts.superseded), (1, 1));

        let answer = engine.query("sessions").await.unwrap();
        assert_eq!(answer.retrieved_data, vec!["Dev sessions are on Tuesdays!"]);
    }

    #[tokio::test]
    async fn test_ambiguous_answer_not_cached() {
        let (engine, _embedder, generator) =
            engine("I don't have that specific information in my current knowledge base.");
        engine.ingest("Dev sessions are on Tuesdays.").await.unwrap();
        engine.query("who leads AI?").await.unwrap();
        let again = engine.query("who leads AI?").await.unwrap();
        assert!(!again.cached);
        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (engine, _embedder, _generator) = engine("ok");
        let err = engine.ingest("   ").await.unwrap_err();
        assert!(validation_message(&err).is_some());
        let err = engine.query("").await.unwrap_err();
        assert_eq!(validation_message(&err), Some("\"query\" field is required"));
        let err = engine
            .ingest_chunks(vec![ChunkInput::Binary(vec![0xff])])
            .await
            .unwrap_err();
        assert!(validation_message(&err).is_some());
    }

    #[tokio::test]
    async fn test_generation_failure_caches_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let engine = RagEngine::new(
            store.clone(),
            Arc::new(LetterEmbedder {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FailingGenerator),
            EngineParams::default(),
        );
        engine.ingest("Dev sessions are on Tuesdays.").await.unwrap();
        let err = engine.query("when?").await.unwrap_err();
        assert!(validation_message(&err).is_none());
        assert!(store.cache_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_failures_never_fail_requests() {
        let store = Arc::new(BrokenCache {
            chunks: InMemoryStore::new(),
        });
        let generator = Arc::new(ScriptedGenerator {
            answer: "Tuesdays.".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let engine = RagEngine::new(
            store.clone(),
            Arc::new(LetterEmbedder {
                calls: AtomicUsize::new(0),
            }),
            generator.clone(),
            EngineParams::default(),
        );

        let outcome = engine.ingest("Dev sessions are on Tuesdays.").await.unwrap();
        assert_eq!(outcome.chunks_inserted, 1);

        for _ in 0..2 {
            let answer = engine.query("when are dev sessions?").await.unwrap();
            assert!(!answer.cached);
            assert_eq!(answer.answer, "Tuesdays.");
            assert_eq!(answer.retrieved_data, vec!["Dev sessions are on Tuesdays."]);
        }
        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
        assert_eq!(store.count_chunks().await.unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_ingest_embeds_in_bounded_batches() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(LetterEmbedder {
            calls: AtomicUsize::new(0),
        });
        let params = EngineParams {
            embed_batch_size: 2,
            ..EngineParams::default()
        };
        let engine = RagEngine::new(
            store.clone(),
            embedder.clone(),
            Arc::new(FailingGenerator),
            params,
        );

        // Disjoint letters: no chunk is a near-duplicate of another.
        let inputs = ["aaa", "bbb", "ccc", "ddd", "eee"]
            .into_iter()
            .map(ChunkInput::from)
            .collect();
        let outcome = engine.ingest_chunks(inputs).await.unwrap();
        assert_eq!(outcome.chunks_inserted, 5);
        assert_eq!(outcome.superseded_old_chunks, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.count_chunks().await.unwrap().active, 5);
    }
}
