//! Two-tier answer cache with confidence-gated writes.
//!
//! # Lookup
//!
//! ```text
//! CHECK_EXACT ──hit──▶ DONE
//!      │
//!     miss
//!      ▼
//! EMBED_QUERY ──▶ CHECK_SEMANTIC ──hit──▶ DONE
//!                        │
//!                       miss ──▶ MISS
//! ```
//!
//! An exact hit never calls the embedder. The semantic tier compares the
//! query embedding against every live entry and takes the best match at or
//! above `threshold`. The query embedding computed along the way is handed
//! back so the caller can reuse it for retrieval.
//!
//! # Admission
//!
//! Writes happen only after a freshly generated answer. The answer is
//! classified by an [`AnswerClassifier`]; what gets written is decided by
//! the [`AdmissionPolicy`].
//!
//! Any store or embedding failure inside the cache is logged and degrades
//! to a miss or a skipped write. Expiry is the store's responsibility.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::CacheEntry;
use crate::search::RetrievalCandidate;
use crate::store::CacheStore;

/// Phrases that mark an answer as a non-answer.
pub const AMBIGUOUS_PHRASES: &[&str] = &[
    "i don't have that specific information",
    "could not generate an answer",
    "i don't know",
    "unsure",
];

/// Canned greeting/identity answers admitted by the strict policy
/// regardless of retrieval confidence.
pub const STANDARD_ANSWERS: &[&str] = &[
    "hello! how can i help you today?",
    "hi there! how can i help you today?",
    "i am the csec dev division assistant.",
    "i'm the csec dev division assistant.",
];

/// Outcome of classifying a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerClass {
    Ambiguous,
    Normal,
}

/// Decides whether an answer is a real answer or a fallback.
pub trait AnswerClassifier: Send + Sync {
    fn classify(&self, answer: &str) -> AnswerClass;
}

/// Case-insensitive substring match against a phrase list.
#[derive(Debug, Clone)]
pub struct PhraseClassifier {
    phrases: Vec<String>,
}

impl PhraseClassifier {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for PhraseClassifier {
    fn default() -> Self {
        Self::new(AMBIGUOUS_PHRASES)
    }
}

impl AnswerClassifier for PhraseClassifier {
    fn classify(&self, answer: &str) -> AnswerClass {
        let lower = answer.to_lowercase();
        if self.phrases.iter().any(|p| lower.contains(p.as_str())) {
            AnswerClass::Ambiguous
        } else {
            AnswerClass::Normal
        }
    }
}

/// Which lookup tiers are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Exact, then semantic.
    #[default]
    Semantic,
    /// Exact only; lookups never embed.
    Exact,
}

impl std::str::FromStr for CacheMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(CacheMode::Semantic),
            "exact" => Ok(CacheMode::Exact),
            other => bail!("Unknown cache mode: '{other}'. Must be semantic or exact."),
        }
    }
}

/// Rule applied before writing a generated answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AdmissionPolicy {
    /// Write every answer that is not ambiguous.
    #[default]
    NotAmbiguous,
    /// Write non-ambiguous answers that are either well grounded
    /// (`confidence >= min_confidence`) or one of the standard answers.
    Strict {
        min_confidence: f32,
        standard_answers: Vec<String>,
    },
}

impl AdmissionPolicy {
    pub fn strict(min_confidence: f32) -> Self {
        AdmissionPolicy::Strict {
            min_confidence,
            standard_answers: STANDARD_ANSWERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Cache tuning parameters.
#[derive(Debug, Clone)]
pub struct CacheParams {
    pub mode: CacheMode,
    /// Minimum cosine similarity for a semantic hit.
    pub threshold: f32,
    pub admission: AdmissionPolicy,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            mode: CacheMode::Semantic,
            threshold: 0.93,
            admission: AdmissionPolicy::NotAmbiguous,
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit {
        answer: String,
        /// `true` when served by the similarity tier.
        semantic: bool,
        query_embedding: Option<Vec<f32>>,
    },
    Miss {
        /// Present when the semantic tier already embedded the query.
        query_embedding: Option<Vec<f32>>,
    },
}

/// Cosine similarity between the query and the top retrieved chunk.
///
/// `None` when nothing was retrieved or the vectors cannot be compared.
pub fn retrieval_confidence(query_embedding: &[f32], retrieved: &[RetrievalCandidate]) -> Option<f32> {
    let top = retrieved.first()?;
    cosine_similarity(query_embedding, &top.embedding).ok()
}

/// Exact + semantic answer cache over a [`CacheStore`].
pub struct AnswerCache<S: ?Sized> {
    store: Arc<S>,
    params: CacheParams,
    classifier: Arc<dyn AnswerClassifier>,
}

impl<S: CacheStore + ?Sized> AnswerCache<S> {
    pub fn new(store: Arc<S>, params: CacheParams) -> Self {
        Self {
            store,
            params,
            classifier: Arc::new(PhraseClassifier::default()),
        }
    }

    /// Swap the ambiguity heuristic.
    pub fn with_classifier(mut self, classifier: Arc<dyn AnswerClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn params(&self) -> &CacheParams {
        &self.params
    }

    /// Look `query` up, exact tier first.
    pub async fn lookup(&self, query: &str, embedder: &dyn Embedder) -> CacheLookup {
        match self.store.find_exact(query).await {
            Ok(Some(entry)) => {
                info!("exact cache hit");
                self.touch(&entry.id).await;
                return CacheLookup::Hit {
                    answer: entry.answer,
                    semantic: false,
                    query_embedding: entry.embedding,
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!("exact cache lookup failed: {e:#}");
                return CacheLookup::Miss {
                    query_embedding: None,
                };
            }
        }

        if self.params.mode == CacheMode::Exact {
            return CacheLookup::Miss {
                query_embedding: None,
            };
        }

        let query_embedding = match embedder.embed_one(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("embedding query for semantic cache failed: {e:#}");
                return CacheLookup::Miss {
                    query_embedding: None,
                };
            }
        };

        let entries = match self.store.cache_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("semantic cache scan failed: {e:#}");
                return CacheLookup::Miss {
                    query_embedding: Some(query_embedding),
                };
            }
        };

        let mut best: Option<(f32, CacheEntry)> = None;
        for entry in entries {
            let Some(emb) = entry.embedding.as_deref() else {
                continue;
            };
            let score = match cosine_similarity(&query_embedding, emb) {
                Ok(s) => s,
                Err(e) => {
                    debug!(entry_id = %entry.id, "skipping cache entry: {e}");
                    continue;
                }
            };
            if best.as_ref().map_or(true, |(b, _)| score > *b) {
                best = Some((score, entry));
            }
        }

        match best {
            Some((score, entry)) if score >= self.params.threshold => {
                info!(score, matched = %entry.query, "semantic cache hit");
                self.touch(&entry.id).await;
                CacheLookup::Hit {
                    answer: entry.answer,
                    semantic: true,
                    query_embedding: Some(query_embedding),
                }
            }
            best => {
                info!(best_score = best.map(|(s, _)| s), "semantic cache miss");
                CacheLookup::Miss {
                    query_embedding: Some(query_embedding),
                }
            }
        }
    }

    /// Apply the admission policy to a generated answer.
    pub fn admits(&self, answer: &str, confidence: Option<f32>) -> bool {
        if self.classifier.classify(answer) == AnswerClass::Ambiguous {
            return false;
        }
        match &self.params.admission {
            AdmissionPolicy::NotAmbiguous => true,
            AdmissionPolicy::Strict {
                min_confidence,
                standard_answers,
            } => {
                let grounded = confidence.is_some_and(|c| c >= *min_confidence);
                let normalized = answer.trim().to_lowercase();
                grounded || standard_answers.iter().any(|s| s.to_lowercase() == normalized)
            }
        }
    }

    /// Write `answer` if the admission policy allows it.
    ///
    /// Returns whether an entry was written. Store failures are logged.
    pub async fn admit(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        answer: &str,
        confidence: Option<f32>,
    ) -> bool {
        if !self.admits(answer, confidence) {
            info!(?confidence, "answer not admitted to cache");
            return false;
        }

        let entry = CacheEntry::new(query, query_embedding.map(|e| e.to_vec()), answer);
        match self.store.insert_entry(&entry).await {
            Ok(()) => {
                info!("saved answer to cache");
                true
            }
            Err(e) => {
                warn!("failed to save answer to cache: {e:#}");
                false
            }
        }
    }

    /// Drop every cached answer after the knowledge base changed.
    pub async fn invalidate(&self) {
        match self.store.clear_cache().await {
            Ok(n) => info!(removed = n, "answer cache invalidated"),
            Err(e) => warn!("answer cache invalidation failed: {e:#}"),
        }
    }

    async fn touch(&self, id: &str) {
        if let Err(e) = self.store.touch_entry(id).await {
            warn!(entry_id = %id, "failed to update cache last_accessed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed vector per known text and counts calls.
    struct TableEmbedder {
        table: Vec<(&'static str, Vec<f32>)>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(table: Vec<(&'static str, Vec<f32>)>) -> Self {
            Self {
                table,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            inputs
                .iter()
                .map(|i| {
                    self.table
                        .iter()
                        .find(|(t, _)| t == i)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| anyhow::anyhow!("no vector for {i}"))
                })
                .collect()
        }
    }

    fn cache(store: Arc<InMemoryStore>) -> AnswerCache<InMemoryStore> {
        AnswerCache::new(store, CacheParams::default())
    }

    #[tokio::test]
    async fn test_exact_hit_skips_embedding() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache(store.clone());
        assert!(cache.admit("when?", Some(&[1.0, 0.0]), "Tuesdays.", None).await);

        let embedder = TableEmbedder::new(Vec::new());
        let lookup = cache.lookup("when?", &embedder).await;
        assert_eq!(
            lookup,
            CacheLookup::Hit {
                answer: "Tuesdays.".into(),
                semantic: false,
                query_embedding: Some(vec![1.0, 0.0]),
            }
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_semantic_hit_above_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache(store);
        cache
            .admit("when does dev meet?", Some(&[1.0, 0.0]), "Tuesdays.", None)
            .await;

        let embedder = TableEmbedder::new(vec![
            ("what day does dev meet?", vec![0.99, 0.05]),
            ("where is the office?", vec![0.2, 0.98]),
        ]);

        match cache.lookup("what day does dev meet?", &embedder).await {
            CacheLookup::Hit {
                answer, semantic, ..
            } => {
                assert_eq!(answer, "Tuesdays.");
                assert!(semantic);
            }
            other => panic!("expected hit, got {other:?}"),
        }

        match cache.lookup("where is the office?", &embedder).await {
            CacheLookup::Miss { query_embedding } => {
                assert_eq!(query_embedding, Some(vec![0.2, 0.98]));
            }
            other => panic!("expected miss, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_semantic_picks_best_entry() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache(store);
        cache.admit("a", Some(&[1.0, 0.0]), "answer a", None).await;
        cache.admit("b", Some(&[0.96, 0.28]), "answer b", None).await;

        let embedder = TableEmbedder::new(vec![("q", vec![0.97, 0.24])]);
        match cache.lookup("q", &embedder).await {
            CacheLookup::Hit { answer, .. } => assert_eq!(answer, "answer b"),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exact_mode_never_embeds() {
        let store = Arc::new(InMemoryStore::new());
        let cache = AnswerCache::new(
            store,
            CacheParams {
                mode: CacheMode::Exact,
                ..CacheParams::default()
            },
        );
        let embedder = TableEmbedder::new(vec![("q", vec![1.0])]);
        assert_eq!(
            cache.lookup("q", &embedder).await,
            CacheLookup::Miss {
                query_embedding: None
            }
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_a_miss() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache(store);
        let embedder = TableEmbedder::new(Vec::new());
        assert_eq!(
            cache.lookup("unknown", &embedder).await,
            CacheLookup::Miss {
                query_embedding: None
            }
        );
    }

    #[tokio::test]
    async fn test_ambiguous_answers_never_written() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache(store.clone());
        let written = cache
            .admit(
                "q",
                Some(&[1.0]),
                "Sorry, I don't have that specific information in my current knowledge base.",
                Some(0.99),
            )
            .await;
        assert!(!written);
        assert!(store.cache_entries().await.unwrap().is_empty());

        assert!(cache.admit("q", Some(&[1.0]), "Tuesdays at 6pm.", None).await);
        assert_eq!(store.cache_entries().await.unwrap().len(), 1);
    }

    #[test]
    fn test_phrase_classifier_case_insensitive() {
        let c = PhraseClassifier::default();
        assert_eq!(c.classify("I DON'T KNOW"), AnswerClass::Ambiguous);
        assert_eq!(c.classify("I'm unsure about that"), AnswerClass::Ambiguous);
        assert_eq!(c.classify("Could not generate an answer"), AnswerClass::Ambiguous);
        assert_eq!(c.classify("Every Tuesday."), AnswerClass::Normal);
    }

    #[test]
    fn test_strict_policy() {
        let cache = AnswerCache::new(
            Arc::new(InMemoryStore::new()),
            CacheParams {
                admission: AdmissionPolicy::strict(0.85),
                ..CacheParams::default()
            },
        );
        assert!(cache.admits("Tuesdays.", Some(0.9)));
        assert!(!cache.admits("Tuesdays.", Some(0.5)));
        assert!(!cache.admits("Tuesdays.", None));
        assert!(cache.admits("Hello! How can I help you today?", None));
        assert!(!cache.admits("I don't know", Some(0.99)));
    }

    struct AlwaysAmbiguous;

    impl AnswerClassifier for AlwaysAmbiguous {
        fn classify(&self, _answer: &str) -> AnswerClass {
            AnswerClass::Ambiguous
        }
    }

    #[test]
    fn test_classifier_is_pluggable() {
        let cache = AnswerCache::new(Arc::new(InMemoryStore::new()), CacheParams::default())
            .with_classifier(Arc::new(AlwaysAmbiguous));
        assert!(!cache.admits("Tuesdays.", Some(1.0)));
    }

    #[test]
    fn test_retrieval_confidence() {
        assert_eq!(retrieval_confidence(&[1.0, 0.0], &[]), None);
        let cand = RetrievalCandidate {
            id: "c".into(),
            text: "t".into(),
            embedding: vec![1.0, 0.0],
            vector_score: 1.0,
            keyword_score: 0.0,
            combined_score: 1.0,
        };
        let conf = retrieval_confidence(&[1.0, 0.0], &[cand]).unwrap();
        assert!((conf - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_invalidate_clears_entries() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache(store.clone());
        cache.admit("q", None, "a", None).await;
        cache.invalidate().await;
        assert!(store.cache_entries().await.unwrap().is_empty());
    }
}
