//! CLI command implementations.
//!
//! Each `run_*` function performs one command against the configured
//! database and prints a human-readable result to stdout.

use std::path::Path;

use anyhow::{Context, Result};

use ragcache_core::store::{CacheStore, ChunkStore};

use crate::config::Config;
use crate::engine::{open_engine, Engine};
use crate::sqlite_store::SqliteStore;

/// Ingest `text`, or the contents of `file` when given.
pub async fn run_ingest(config: &Config, text: Option<String>, file: Option<&Path>) -> Result<()> {
    let text = match (text, file) {
        (_, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        (Some(text), None) => text,
        (None, None) => anyhow::bail!("Provide text to ingest or --file <path>"),
    };

    let engine = open_engine(config).await?;
    ingest_with(&engine, &text).await
}

pub async fn ingest_with(engine: &Engine, text: &str) -> Result<()> {
    let outcome = engine.ingest(text).await?;
    println!(
        "Ingested {} chunk(s); superseded {} older chunk(s).",
        outcome.chunks_inserted, outcome.superseded_old_chunks
    );

    let counts = engine.store().count_chunks().await?;
    println!(
        "Knowledge base: {} active, {} superseded.",
        counts.active, counts.superseded
    );
    Ok(())
}

/// Answer `query` and print the answer with its sources.
pub async fn run_query(config: &Config, query: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    query_with(&engine, query).await
}

pub async fn query_with(engine: &Engine, query: &str) -> Result<()> {
    let outcome = engine.query(query).await?;

    let source = match outcome.semantic_cache {
        Some(true) => "semantic cache",
        Some(false) => "exact cache",
        None => "generated",
    };
    println!("{}\n", outcome.answer);
    println!("[{}]", source);

    if !outcome.retrieved_data.is_empty() {
        println!("\nContext:");
        for (i, text) in outcome.retrieved_data.iter().enumerate() {
            let preview: String = text.chars().take(120).collect();
            println!("  {}. {}", i + 1, preview.replace('\n', " "));
        }
    }
    Ok(())
}

/// Remove every cached answer. Needs no provider credentials.
pub async fn run_cache_clear(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let removed = store.clear_cache().await?;
    println!("Cleared {} cached answer(s).", removed);
    Ok(())
}
