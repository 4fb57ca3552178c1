#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use ragcache::config::Config;
use ragcache::engine::{build_engine, Engine};
use ragcache::sqlite_store::SqliteStore;
use ragcache_core::embedding::Embedder;
use ragcache_core::generate::Generator;

const DIMS: usize = 256;

/// Hashed bag-of-words vectors: rewordings that keep the same words embed
/// identically, sentences with few shared words land far apart.
pub struct WordEmbedder {
    pub calls: AtomicUsize,
}

impl WordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let mut h: u64 = 0xcbf29ce484222325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|s| Self::vector(s)).collect())
    }
}

/// Answers with a fixed string and records every user prompt.
pub struct RecordingGenerator {
    pub answer: Mutex<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn set_answer(&self, answer: &str) {
        *self.answer.lock().unwrap() = answer.to_string();
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());
        Ok(self.answer.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub _tmp: TempDir,
    pub config: Config,
    pub engine: Arc<Engine>,
    pub embedder: Arc<WordEmbedder>,
    pub generator: Arc<RecordingGenerator>,
}

pub async fn harness(answer: &str) -> Harness {
    harness_with(answer, |_| {}).await
}

pub async fn harness_with(answer: &str, tweak: impl FnOnce(&mut Config)) -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::with_db_path(tmp.path().join("data").join("ragcache.sqlite"));
    tweak(&mut config);

    let store = Arc::new(SqliteStore::open(&config).await.unwrap());
    let embedder = WordEmbedder::new();
    let generator = RecordingGenerator::new(answer);
    let engine = build_engine(&config, store, embedder.clone(), generator.clone()).unwrap();

    Harness {
        _tmp: tmp,
        config,
        engine: Arc::new(engine),
        embedder,
        generator,
    }
}
