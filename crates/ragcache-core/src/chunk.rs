//! Sliding-window text chunker.
//!
//! Splits text into bounded, overlapping segments suitable for embedding.
//!
//! # Algorithm
//!
//! 1. Clamp `chunk_size` to at least [`MIN_CHUNK_SIZE`] and `overlap` to
//!    `0..chunk_size`.
//! 2. If a [`TokenCodec`] is configured, encode the text into tokens and
//!    slide a window of `chunk_size` tokens forward by
//!    `chunk_size - overlap`, decoding each window back to text.
//! 3. If no codec is configured, or encoding/decoding fails anywhere, run
//!    the identical window over whitespace-separated words instead.
//! 4. The last window always ends at the final unit; no window is emitted
//!    that lies entirely inside the previous one.
//!
//! The word fallback never fails. Empty or whitespace-only text yields no
//! chunks.
//!
//! # Example
//!
//! ```rust
//! use ragcache_core::chunk::Chunker;
//!
//! let chunker = Chunker::new(10, 5);
//! let text = (1..=15).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
//! let chunks = chunker.chunk(&text);
//! assert_eq!(chunks.len(), 2);
//! assert!(chunks[1].starts_with("w6 "));
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::warn;

use crate::models::ChunkInput;

pub const DEFAULT_CHUNK_SIZE: usize = 200;
pub const DEFAULT_OVERLAP: usize = 100;
pub const MIN_CHUNK_SIZE: usize = 10;

/// A reversible tokenizer used for token-based windows.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;
}

/// Chunker configuration plus an optional tokenizer.
#[derive(Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    codec: Option<Arc<dyn TokenCodec>>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP)
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .field("tokenizer", &self.codec.is_some())
            .finish()
    }
}

impl Chunker {
    /// Word-window chunker with clamped parameters.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let (chunk_size, overlap) = clamp_params(chunk_size, overlap);
        Self {
            chunk_size,
            overlap,
            codec: None,
        }
    }

    /// Use `codec` for token windows, falling back to words on failure.
    pub fn with_codec(mut self, codec: Arc<dyn TokenCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        if let Some(codec) = &self.codec {
            match chunk_tokens(codec.as_ref(), text, self.chunk_size, self.overlap) {
                Ok(chunks) if !chunks.is_empty() => return chunks,
                Ok(_) => warn!("tokenizer produced no chunks, falling back to word chunking"),
                Err(e) => warn!("tokenizer failed, falling back to word chunking: {e:#}"),
            }
        }

        chunk_words(text, self.chunk_size, self.overlap)
    }
}

/// Apply the documented clamps: `chunk_size >= 10`, `overlap < chunk_size`.
pub fn clamp_params(chunk_size: usize, overlap: usize) -> (usize, usize) {
    let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
    let overlap = overlap.min(chunk_size - 1);
    (chunk_size, overlap)
}

/// Start/end offsets of each sliding window over `len` units.
fn window_bounds(len: usize, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let step = chunk_size - overlap;
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < len {
        let end = len.min(start + chunk_size);
        bounds.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    bounds
}

/// Word-based sliding windows, joined with single spaces.
pub fn chunk_words(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let (chunk_size, overlap) = clamp_params(chunk_size, overlap);
    let words: Vec<&str> = text.split_whitespace().collect();
    window_bounds(words.len(), chunk_size, overlap)
        .into_iter()
        .map(|(start, end)| words[start..end].join(" "))
        .collect()
}

fn chunk_tokens(
    codec: &dyn TokenCodec,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>> {
    let tokens = codec.encode(text)?;
    let mut chunks = Vec::new();
    for (start, end) in window_bounds(tokens.len(), chunk_size, overlap) {
        let decoded = codec.decode(&tokens[start..end])?;
        if decoded.is_empty() {
            bail!("decoded empty text for tokens {start}..{end}");
        }
        chunks.push(decoded);
    }
    Ok(chunks)
}

/// Decode raw chunk inputs into trimmed, non-empty strings.
///
/// Accepts plain text, UTF-8 byte buffers, and structured values carrying a
/// `text` (preferred) or `content` field. Anything else is dropped with a
/// warning.
pub fn normalize_chunks(inputs: Vec<ChunkInput>) -> Vec<String> {
    let mut out = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.into_iter().enumerate() {
        let raw = match input {
            ChunkInput::Text(s) => Some(s),
            ChunkInput::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(index = i, "dropping chunk: not valid UTF-8: {e}");
                    None
                }
            },
            ChunkInput::Structured { text, content } => {
                let field = text.or(content);
                if field.is_none() {
                    warn!(index = i, "dropping chunk: no text or content field");
                }
                field
            }
        };

        if let Some(s) = raw {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                warn!(index = i, "dropping chunk: empty after trimming");
            } else {
                out.push(trimmed.to_string());
            }
        }
    }
    out
}
