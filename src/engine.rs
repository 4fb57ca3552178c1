//! Wiring of store, providers, and config into a [`RagEngine`].

use std::sync::Arc;

use anyhow::Result;

use ragcache_core::embedding::Embedder;
use ragcache_core::generate::Generator;
use ragcache_core::RagEngine;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::generate::GeminiGenerator;
use crate::sqlite_store::SqliteStore;
use crate::tokenizer::build_chunker;

/// The engine as the binary runs it: SQLite plus remote providers.
pub type Engine = RagEngine<SqliteStore>;

/// Assemble an engine from explicit parts.
pub fn build_engine(
    config: &Config,
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
) -> Result<Engine> {
    let mut engine = RagEngine::new(store, embedder, generator, config.engine_params()?)
        .with_chunker(build_chunker(&config.chunking));
    if let Some(prompt) = &config.generation.system_prompt {
        engine = engine.with_system_prompt(prompt.clone());
    }
    Ok(engine)
}

/// Open the configured database and connect the Voyage and Gemini clients.
///
/// Fails if either API key environment variable is unset.
pub async fn open_engine(config: &Config) -> Result<Engine> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let embedder = Arc::new(EmbeddingClient::from_config(&config.embedding)?);
    let generator = Arc::new(GeminiGenerator::new(&config.generation)?);
    build_engine(config, store, embedder, generator)
}
