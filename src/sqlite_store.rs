//! SQLite-backed [`ChunkStore`] and [`CacheStore`].
//!
//! Chunks live in `chunks` with a mirrored FTS5 index in `chunks_fts`;
//! embeddings are little-endian f32 BLOBs. Vector search is a brute-force
//! cosine scan over active rows. Cache expiry is enforced here: expired
//! rows are invisible to every read and purged on each write.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragcache_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragcache_core::models::{CacheEntry, Chunk, ChunkState};
use ragcache_core::store::{CacheStore, ChunkCounts, ChunkHit, ChunkStore, DEFAULT_CACHE_TTL_SECS};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
    cache_ttl_secs: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_cache_ttl(pool, DEFAULT_CACHE_TTL_SECS)
    }

    pub fn with_cache_ttl(pool: SqlitePool, cache_ttl_secs: i64) -> Self {
        Self {
            pool,
            cache_ttl_secs,
        }
    }

    /// Connect, migrate, and wrap the configured database.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::with_cache_ttl(pool, config.cache.ttl_secs))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Oldest `created_at` still considered live.
    fn ttl_cutoff(&self) -> i64 {
        chrono::Utc::now().timestamp() - self.cache_ttl_secs
    }
}

/// Rewrite free text as an FTS5 query: each alphanumeric term quoted,
/// joined with OR. Returns `None` when no terms remain.
pub fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let blob: Vec<u8> = row.get("embedding");
    let superseded_by: Option<String> = row.get("superseded_by");
    Chunk {
        id: row.get("id"),
        text: row.get("text"),
        embedding: blob_to_vec(&blob),
        created_at: row.get("created_at"),
        state: match superseded_by {
            Some(by) => ChunkState::Superseded { by },
            None => ChunkState::Active,
        },
    }
}

fn row_to_entry(row: &SqliteRow) -> CacheEntry {
    let blob: Option<Vec<u8>> = row.get("embedding");
    CacheEntry {
        id: row.get("id"),
        query: row.get("query"),
        embedding: blob.map(|b| blob_to_vec(&b)),
        answer: row.get("answer"),
        created_at: row.get("created_at"),
        last_accessed: row.get("last_accessed"),
    }
}

fn sort_hits(hits: &mut [ChunkHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, text, embedding, created_at, superseded_by) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.created_at)
            .bind(chunk.superseded_by())
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_superseded(&self, id: &str, by: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE chunks SET superseded_by = ? WHERE id = ? AND superseded_by IS NULL")
                .bind(by)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            "SELECT id, text, embedding, created_at, superseded_by FROM chunks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        _num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let rows = sqlx::query(
            "SELECT id, text, embedding, created_at, superseded_by FROM chunks WHERE superseded_by IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .map(row_to_chunk)
            .filter_map(|chunk| {
                let sim = cosine_similarity(query_vec, &chunk.embedding).ok()?;
                Some(ChunkHit {
                    chunk,
                    score: sim as f64,
                })
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.text, c.embedding, c.created_at, c.superseded_by, f.rank
            FROM (
                SELECT chunk_id, rank FROM chunks_fts WHERE chunks_fts MATCH ?
            ) f
            JOIN chunks c ON c.id = f.chunk_id
            WHERE c.superseded_by IS NULL
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // bm25 rank is lower-is-better; flip it so higher is better.
        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkHit {
                    chunk: row_to_chunk(row),
                    score: -rank,
                }
            })
            .collect())
    }

    async fn count_chunks(&self) -> Result<ChunkCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN superseded_by IS NULL THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN superseded_by IS NOT NULL THEN 1 ELSE 0 END), 0) AS superseded
            FROM chunks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let active: i64 = row.get("active");
        let superseded: i64 = row.get("superseded");
        Ok(ChunkCounts {
            active: active as u64,
            superseded: superseded as u64,
        })
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn find_exact(&self, query: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, query, embedding, answer, created_at, last_accessed
            FROM cache_entries
            WHERE query = ? AND created_at > ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(query)
        .bind(self.ttl_cutoff())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_entry))
    }

    async fn cache_entries(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            "SELECT id, query, embedding, answer, created_at, last_accessed FROM cache_entries WHERE created_at > ?",
        )
        .bind(self.ttl_cutoff())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn touch_entry(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET last_accessed = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_entry(&self, entry: &CacheEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cache_entries WHERE created_at <= ?")
            .bind(self.ttl_cutoff())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (id, query, embedding, answer, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.query)
        .bind(entry.embedding.as_deref().map(vec_to_blob))
        .bind(&entry.answer)
        .bind(entry.created_at)
        .bind(entry.last_accessed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clear_cache(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
