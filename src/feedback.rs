//! User feedback collection.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ragcache_core::ValidationError;

/// A stored feedback record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub id: String,
    pub message: String,
    pub rating: Option<i64>,
    pub user_agent: Option<String>,
    /// ISO 8601, UTC.
    pub created_at: String,
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Feedback table access over the shared pool.
#[derive(Clone)]
pub struct FeedbackStore {
    pool: SqlitePool,
}

impl FeedbackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Validate and store one feedback message.
    ///
    /// The message must be non-empty after trimming; a rating, when given,
    /// must be within `1..=5`.
    pub async fn submit(
        &self,
        message: Option<&str>,
        rating: Option<i64>,
        user_agent: Option<&str>,
    ) -> Result<Feedback> {
        let message = message.map(str::trim).unwrap_or_default();
        if message.is_empty() {
            return Err(ValidationError::new("Feedback message is required").into());
        }
        if let Some(r) = rating {
            if !(1..=5).contains(&r) {
                return Err(ValidationError::new("Rating must be between 1 and 5").into());
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO feedback (id, message, rating, user_agent, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(message)
        .bind(rating)
        .bind(user_agent)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Feedback {
            id,
            message: message.to_string(),
            rating,
            user_agent: user_agent.map(String::from),
            created_at: format_ts_iso(now),
        })
    }

    /// All feedback, newest first.
    pub async fn list(&self) -> Result<Vec<Feedback>> {
        let rows = sqlx::query(
            "SELECT id, message, rating, user_agent, created_at FROM feedback ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let created_at: i64 = row.get("created_at");
                Feedback {
                    id: row.get("id"),
                    message: row.get("message"),
                    rating: row.get("rating"),
                    user_agent: row.get("user_agent"),
                    created_at: format_ts_iso(created_at),
                }
            })
            .collect())
    }
}
