//! Chunker construction from `[chunking]` config.
//!
//! By default chunk windows count `cl100k_base` BPE tokens, an encoding
//! compiled into the binary. `chunking.tokenizer = "words"` counts
//! whitespace-separated words instead. With the `tokenizer` feature,
//! `chunking.tokenizer_path` names a HuggingFace `tokenizer.json` that takes
//! precedence over both. If the configured tokenizer cannot be loaded,
//! chunking falls back to word windows.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use ragcache_core::chunk::{Chunker, TokenCodec};

use crate::config::{ChunkingConfig, TokenizerKind};

#[cfg(feature = "tokenizer")]
pub use hf::HfTokenCodec;

/// [`TokenCodec`] over the bundled `cl100k_base` encoding.
pub struct Cl100kCodec {
    bpe: tiktoken_rs::CoreBPE,
}

impl Cl100kCodec {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }
}

impl TokenCodec for Cl100kCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        // Special-token markup in ingested text is treated as plain text.
        Ok(self.bpe.encode_ordinary(text))
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe.decode(tokens.to_vec())
    }
}

#[cfg(feature = "tokenizer")]
mod hf {
    use std::path::Path;

    use anyhow::{anyhow, Result};
    use ragcache_core::chunk::TokenCodec;

    /// [`TokenCodec`] over a `tokenizers::Tokenizer`.
    pub struct HfTokenCodec {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenCodec {
        pub fn from_file(path: &Path) -> Result<Self> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
            Ok(Self { inner })
        }
    }

    impl TokenCodec for HfTokenCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            let encoding = self
                .inner
                .encode(text, false)
                .map_err(|e| anyhow!("tokenizer encode failed: {e}"))?;
            Ok(encoding.get_ids().to_vec())
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            self.inner
                .decode(tokens, true)
                .map_err(|e| anyhow!("tokenizer decode failed: {e}"))
        }
    }
}

#[cfg(feature = "tokenizer")]
fn load_file_codec(config: &ChunkingConfig) -> Option<Arc<dyn TokenCodec>> {
    let path = config.tokenizer_path.as_ref()?;
    match HfTokenCodec::from_file(path) {
        Ok(codec) => {
            info!(path = %path.display(), "token chunking with tokenizer file");
            Some(Arc::new(codec))
        }
        Err(e) => {
            warn!("{e:#}; using chunking.tokenizer instead");
            None
        }
    }
}

#[cfg(not(feature = "tokenizer"))]
fn load_file_codec(config: &ChunkingConfig) -> Option<Arc<dyn TokenCodec>> {
    if let Some(path) = &config.tokenizer_path {
        warn!(
            path = %path.display(),
            "chunking.tokenizer_path is set but ragcache was built without the `tokenizer` feature"
        );
    }
    None
}

fn load_codec(config: &ChunkingConfig) -> Option<Arc<dyn TokenCodec>> {
    if let Some(codec) = load_file_codec(config) {
        return Some(codec);
    }
    match config.tokenizer {
        TokenizerKind::Words => None,
        TokenizerKind::Cl100kBase => match Cl100kCodec::new() {
            Ok(codec) => Some(Arc::new(codec)),
            Err(e) => {
                warn!("cl100k_base encoding unavailable, using word chunking: {e:#}");
                None
            }
        },
    }
}

/// Build the ingest chunker described by `config`.
pub fn build_chunker(config: &ChunkingConfig) -> Chunker {
    let chunker = Chunker::new(config.chunk_size, config.overlap);
    if chunker.chunk_size() != config.chunk_size || chunker.overlap() != config.overlap {
        info!(
            chunk_size = chunker.chunk_size(),
            overlap = chunker.overlap(),
            "chunking parameters clamped"
        );
    }
    match load_codec(config) {
        Some(codec) => chunker.with_codec(codec),
        None => chunker,
    }
}
