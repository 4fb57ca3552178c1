//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that the ingest and query pipelines call,
//! plus pure helpers for similarity computation and BLOB encoding.
//!
//! The concrete remote client (rate limiting, retry, HTTP) lives in the
//! `ragcache` app crate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use thiserror::Error;

/// Turns text into fixed-length vectors.
///
/// Implementations return exactly one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        self.embed(&[input.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

/// Why two vectors could not be compared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("vector length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("cannot compare empty vectors")]
    Empty,
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Vectors of different lengths, or
/// empty vectors, are an error. A vector whose norm is exactly zero has
/// similarity `0.0` with everything; any other vector has similarity `1.0`
/// with itself, however small its components.
///
/// ```rust
/// use ragcache_core::embedding::cosine_similarity;
///
/// let v = [3.0f32, 4.0];
/// assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
/// assert!(cosine_similarity(&v, &[1.0]).is_err());
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(SimilarityError::Empty);
    }

    // f64 accumulation keeps squares of small components from underflowing.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(sim.clamp(-1.0, 1.0) as f32)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        for v in [vec![1.0, 2.0, 3.0], vec![-0.3, 7.0], vec![0.001]] {
            let sim = cosine_similarity(&v, &v).unwrap();
            assert!((sim - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cosine_identical_tiny_magnitude() {
        for v in [vec![1e-4f32, 1e-4], vec![3e-20, -4e-20], vec![1e-40]] {
            let sim = cosine_similarity(&v, &v).unwrap();
            assert!((sim - 1.0).abs() < 1e-6, "cos(v, v) for {v:?} was {sim}");
        }
        let sim = cosine_similarity(&[1e-4, 0.0], &[0.0, 1e-4]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_symmetric() {
        let a = vec![0.2, -1.0, 4.0];
        let b = vec![1.5, 0.5, -2.0];
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(
            cosine_similarity(&[1.0, 2.0], &[1.0]),
            Err(SimilarityError::LengthMismatch { left: 2, right: 1 })
        );
    }

    #[test]
    fn test_cosine_empty_and_zero() {
        assert_eq!(cosine_similarity(&[], &[]), Err(SimilarityError::Empty));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), Ok(0.0));
    }
}
