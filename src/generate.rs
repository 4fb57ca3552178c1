//! Gemini `generateContent` client implementing the core [`Generator`].

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use ragcache_core::generate::{Generator, FALLBACK_ANSWER};

use crate::config::GenerationConfig;

pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiGenerator {
    /// Build from config, reading the API key from `config.api_key_env`.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key: api_key.into(),
        })
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// First candidate's first text part, or the fallback answer.
fn extract_answer(body: &str) -> Result<String> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).context("Invalid generation response")?;
    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .filter(|t| !t.is_empty());
    Ok(text.unwrap_or_else(|| FALLBACK_ANSWER.to_string()))
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": user_prompt }] }],
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .context("Generation request failed")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "generation request failed");
            bail!("generation request failed with status {}", status.as_u16());
        }

        extract_answer(&body)
    }
}
