//! Remote embedding provider.
//!
//! [`VoyageBackend`] speaks the Voyage AI embeddings API
//! (`POST {model, input}` → `{data: [{embedding}]}`). [`EmbeddingClient`]
//! wraps any [`EmbeddingBackend`] with the process-wide [`RateLimiter`] and
//! a bounded retry on rate-limit responses, and implements the core
//! [`Embedder`] trait used by the pipeline.
//!
//! # Retry Strategy
//!
//! - HTTP 429 → retry, up to `max_attempts` attempts in total
//! - Anything else → fail immediately
//! - Backoff: `base`, `2 × base`, `4 × base`, … capped at `cap`
//!
//! Every attempt, retries included, first waits on the rate limiter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use ragcache_core::embedding::Embedder;

use crate::config::EmbeddingConfig;
use crate::rate_limit::RateLimiter;

/// Provider failures the retry loop must tell apart.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service rate limited the request (HTTP 429): {body}")]
    RateLimited { body: String },
    #[error("embedding service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
}

pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<EmbedError>(),
        Some(EmbedError::RateLimited { .. })
    )
}

/// One raw round-trip to an embedding service.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ============ Voyage backend ============

pub struct VoyageBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl VoyageBackend {
    /// Build from config, reading the API key from `config.api_key_env`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Extract vectors from a response body, restoring input order when the
/// service reports indices.
fn parse_embedding_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_str(body).context("Invalid embedding response")?;
    if parsed.data.iter().all(|d| d.index.is_some()) {
        parsed.data.sort_by_key(|d| d.index);
    }
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingBackend for VoyageBackend {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Embedding request failed")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            return Err(EmbedError::RateLimited { body: text }.into());
        }
        if !status.is_success() {
            return Err(EmbedError::Api {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        parse_embedding_response(&text)
    }
}

// ============ Rate-limited client ============

/// Backoff before retry number `retry` (1-based).
pub fn backoff_delay(retry: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32 << (retry.saturating_sub(1)).min(16);
    base.saturating_mul(factor).min(cap)
}

pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    limiter: RateLimiter,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(Duration::from_millis(config.min_interval_ms)),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// The Voyage-backed client described by `config`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(VoyageBackend::new(config)?), config))
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;
            debug!(attempt, inputs = inputs.len(), "embedding request");

            match self.backend.embed_batch(inputs).await {
                Ok(vectors) => {
                    if vectors.len() != inputs.len() {
                        bail!(
                            "Embedding service returned {} vectors for {} inputs",
                            vectors.len(),
                            inputs.len()
                        );
                    }
                    return Ok(vectors);
                }
                Err(e) if is_rate_limited(&e) && attempt < self.max_attempts => {
                    let delay = backoff_delay(attempt, self.backoff_base, self.backoff_cap);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "embedding service rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
