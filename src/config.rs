//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/ragcache.sqlite"
//!
//! [cache]
//! mode = "semantic"      # or "exact"
//! threshold = 0.93
//! ttl_secs = 86400
//! admission = "not_ambiguous"   # or "strict"
//! ```
//!
//! API keys are never read from the file; each provider section names the
//! environment variable holding its key.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragcache_core::cache::{AdmissionPolicy, CacheMode, CacheParams};
use ragcache_core::chunk::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use ragcache_core::dedup::DedupParams;
use ragcache_core::rag::{EngineParams, DEFAULT_EMBED_BATCH_SIZE};
use ragcache_core::search::RetrievalParams;
use ragcache_core::store::DEFAULT_CACHE_TTL_SECS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Unit that `chunk_size` and `overlap` count.
    #[serde(default)]
    pub tokenizer: TokenizerKind,
    /// HuggingFace `tokenizer.json`; takes precedence over `tokenizer` when
    /// built with the `tokenizer` feature.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            tokenizer: TokenizerKind::default(),
            tokenizer_path: None,
        }
    }
}

/// Built-in chunking units.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenizerKind {
    /// BPE tokens of the `cl100k_base` encoding, bundled with the binary.
    #[default]
    #[serde(rename = "cl100k_base")]
    Cl100kBase,
    /// Whitespace-separated words.
    #[serde(rename = "words")]
    Words,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    /// Minimum spacing between provider calls.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Total attempts on rate-limit responses, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Most chunks sent in one embedding request during ingest.
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            url: default_embedding_url(),
            api_key_env: default_embedding_key_env(),
            min_interval_ms: default_min_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            timeout_secs: default_timeout_secs(),
            batch_size: default_embed_batch_size(),
        }
    }
}

fn default_embedding_model() -> String {
    "voyage-3-large".to_string()
}
fn default_embedding_url() -> String {
    "https://api.voyageai.com/v1/embeddings".to_string()
}
fn default_embedding_key_env() -> String {
    "VOYAGE_API_KEY".to_string()
}
fn default_min_interval_ms() -> u64 {
    20_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    10_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embed_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            base_url: default_generation_base_url(),
            api_key_env: default_generation_key_env(),
            timeout_secs: default_generation_timeout_secs(),
            system_prompt: None,
        }
    }
}

fn default_generation_model() -> String {
    "gemini-2.5-flash-preview-09-2025".to_string()
}
fn default_generation_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_generation_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_keyword_boost")]
    pub keyword_boost: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: usize,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_boost: default_keyword_boost(),
            candidate_k_vector: default_candidate_k(),
            candidate_k_keyword: default_candidate_k(),
            num_candidates: default_num_candidates(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_keyword_boost() -> f64 {
    2.0
}
fn default_candidate_k() -> usize {
    50
}
fn default_num_candidates() -> usize {
    100
}
fn default_final_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_threshold")]
    pub threshold: f32,
    #[serde(default = "default_dedup_limit")]
    pub limit: usize,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: default_dedup_threshold(),
            limit: default_dedup_limit(),
            num_candidates: default_num_candidates(),
        }
    }
}

fn default_dedup_threshold() -> f32 {
    0.90
}
fn default_dedup_limit() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_mode")]
    pub mode: String,
    #[serde(default = "default_cache_threshold")]
    pub threshold: f32,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
    #[serde(default = "default_admission")]
    pub admission: String,
    /// Retrieval confidence required by the `strict` admission policy.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: default_cache_mode(),
            threshold: default_cache_threshold(),
            ttl_secs: default_ttl_secs(),
            admission: default_admission(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_cache_mode() -> String {
    "semantic".to_string()
}
fn default_cache_threshold() -> f32 {
    0.93
}
fn default_ttl_secs() -> i64 {
    DEFAULT_CACHE_TTL_SECS
}
fn default_admission() -> String {
    "not_ambiguous".to_string()
}
fn default_min_confidence() -> f32 {
    0.85
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// All defaults, storing the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            dedup: DedupConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Translate the validated sections into pipeline parameters.
    pub fn engine_params(&self) -> Result<EngineParams> {
        let mode: CacheMode = self.cache.mode.parse()?;
        let admission = match self.cache.admission.as_str() {
            "not_ambiguous" => AdmissionPolicy::NotAmbiguous,
            "strict" => AdmissionPolicy::strict(self.cache.min_confidence),
            other => bail!(
                "Unknown cache admission policy: '{}'. Must be not_ambiguous or strict.",
                other
            ),
        };

        Ok(EngineParams {
            dedup: DedupParams {
                threshold: self.dedup.threshold,
                limit: self.dedup.limit,
                num_candidates: self.dedup.num_candidates,
            },
            retrieval: RetrievalParams {
                keyword_boost: self.retrieval.keyword_boost,
                candidate_k_vector: self.retrieval.candidate_k_vector,
                candidate_k_keyword: self.retrieval.candidate_k_keyword,
                num_candidates: self.retrieval.num_candidates,
                final_limit: self.retrieval.final_limit,
            },
            cache: CacheParams {
                mode,
                threshold: self.cache.threshold,
                admission,
            },
            embed_batch_size: self.embedding.batch_size,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking is clamped downstream; only reject the nonsensical.
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }

    if config.embedding.max_attempts == 0 {
        bail!("embedding.max_attempts must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }

    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.keyword_boost < 0.0 {
        bail!("retrieval.keyword_boost must be >= 0.0");
    }

    if !(0.0..=1.0).contains(&config.dedup.threshold) {
        bail!("dedup.threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.cache.threshold) {
        bail!("cache.threshold must be in [0.0, 1.0]");
    }
    if config.cache.ttl_secs <= 0 {
        bail!("cache.ttl_secs must be > 0");
    }

    // Surfaces unknown mode/admission strings at load time.
    config.engine_params()?;
    Ok(())
}
