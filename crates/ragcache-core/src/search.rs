//! Hybrid retrieval: vector + keyword candidates merged into one ranking.
//!
//! The algorithm operates entirely through the [`ChunkStore`] trait. The
//! caller embeds the query and passes the vector in.
//!
//! # Scoring
//!
//! 1. Fetch `candidate_k_vector` nearest active chunks (cosine similarity).
//! 2. Fetch `candidate_k_keyword` active chunks by full-text relevance.
//! 3. Merge by chunk ID; a chunk missing from one list scores `0.0` there.
//! 4. `combined = vector_score + keyword_score × keyword_boost`.
//! 5. Stable sort by `combined` (desc); ties keep merge order, which is
//!    vector hits first, then keyword-only hits.
//! 6. Truncate to `final_limit`.
//!
//! Raw scores are not normalized, so the boost trades cosine similarity
//! directly against the backend's keyword relevance scale.

use std::collections::HashMap;

use anyhow::Result;

use crate::generate::CONTEXT_SEPARATOR;
use crate::store::{ChunkHit, ChunkStore};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Multiplier applied to the keyword score before summing.
    pub keyword_boost: f64,
    /// Number of vector candidates to fetch.
    pub candidate_k_vector: usize,
    /// Number of keyword candidates to fetch.
    pub candidate_k_keyword: usize,
    /// Breadth hint for the vector index.
    pub num_candidates: usize,
    /// Maximum results to return.
    pub final_limit: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            keyword_boost: 2.0,
            candidate_k_vector: 50,
            candidate_k_keyword: 50,
            num_candidates: 100,
            final_limit: 5,
        }
    }
}

/// A merged candidate, built for the duration of one query.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub combined_score: f64,
}

/// Retrieve the top-ranked active chunks for a query.
pub async fn retrieve<S: ChunkStore + ?Sized>(
    store: &S,
    query: &str,
    query_vec: &[f32],
    params: &RetrievalParams,
) -> Result<Vec<RetrievalCandidate>> {
    let vector_hits = store
        .vector_search(query_vec, params.num_candidates, params.candidate_k_vector)
        .await?;
    let keyword_hits = store
        .keyword_search(query, params.candidate_k_keyword)
        .await?;

    let mut merged = merge_candidates(vector_hits, keyword_hits, params.keyword_boost);
    merged.truncate(params.final_limit);
    Ok(merged)
}

/// Merge both hit lists by chunk ID and sort by combined score.
///
/// Superseded chunks that slip through a backend are dropped here.
pub fn merge_candidates(
    vector_hits: Vec<ChunkHit>,
    keyword_hits: Vec<ChunkHit>,
    keyword_boost: f64,
) -> Vec<RetrievalCandidate> {
    let mut merged: Vec<RetrievalCandidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in vector_hits.into_iter().filter(|h| h.chunk.is_active()) {
        if index.contains_key(&hit.chunk.id) {
            continue;
        }
        index.insert(hit.chunk.id.clone(), merged.len());
        merged.push(RetrievalCandidate {
            id: hit.chunk.id,
            text: hit.chunk.text,
            embedding: hit.chunk.embedding,
            vector_score: hit.score,
            keyword_score: 0.0,
            combined_score: 0.0,
        });
    }

    for hit in keyword_hits.into_iter().filter(|h| h.chunk.is_active()) {
        match index.get(&hit.chunk.id) {
            Some(&i) => {
                let cand = &mut merged[i];
                cand.keyword_score = cand.keyword_score.max(hit.score);
                if cand.embedding.is_empty() {
                    cand.embedding = hit.chunk.embedding;
                }
            }
            None => {
                index.insert(hit.chunk.id.clone(), merged.len());
                merged.push(RetrievalCandidate {
                    id: hit.chunk.id,
                    text: hit.chunk.text,
                    embedding: hit.chunk.embedding,
                    vector_score: 0.0,
                    keyword_score: hit.score,
                    combined_score: 0.0,
                });
            }
        }
    }

    for cand in &mut merged {
        cand.combined_score = cand.vector_score + cand.keyword_score * keyword_boost;
    }

    // `sort_by` is stable: equal scores keep merge order.
    merged.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged
}

/// Join candidate texts in ranked order for the generation prompt.
pub fn build_context(candidates: &[RetrievalCandidate]) -> String {
    candidates
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
