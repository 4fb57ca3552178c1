//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/embeddings/add` | Ingest `{ text }` (or pre-split `{ chunks }`) |
//! | `POST` | `/api/embeddings/query` | Answer `{ query }` |
//! | `POST` | `/api/feedback` | Submit `{ message, rating? }` |
//! | `GET`  | `/api/feedback` | List feedback, newest first |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "message": "\"query\" field is required" }
//! ```
//!
//! Validation failures are `400`. Provider and store failures are logged
//! and reported as a generic `500`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support the
//! browser-based chat client.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use ragcache_core::error::validation_message;
use ragcache_core::models::ChunkInput;

use crate::config::Config;
use crate::engine::{open_engine, Engine};
use crate::feedback::{Feedback, FeedbackStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub feedback: FeedbackStore,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let feedback = FeedbackStore::new(engine.store().pool().clone());
        Self { engine, feedback }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(open_engine(config).await?);
    let app = router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "ragcache server listening");
    println!("ragcache server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/embeddings/add", post(handle_add))
        .route("/api/embeddings/query", post(handle_query))
        .route("/api/feedback", post(handle_submit_feedback).get(handle_list_feedback))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

/// Validation errors become `400` with their message; anything else is
/// logged and hidden behind `generic`.
fn classify_error(err: anyhow::Error, generic: &str) -> AppError {
    if let Some(msg) = validation_message(&err) {
        return bad_request(msg);
    }
    error!("{generic}: {err:#}");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: generic.to_string(),
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|e| bad_request(format!("Invalid JSON body: {}", e.body_text())))
}

/// Success envelope: `{ "success": true, ...body }`.
#[derive(Serialize)]
struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn success<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        body,
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/embeddings/add ============

#[derive(Deserialize)]
struct AddRequest {
    #[serde(default)]
    text: Option<String>,
    /// Pre-split chunks; bypasses the chunker when present.
    #[serde(default)]
    chunks: Option<Vec<ChunkInput>>,
}

async fn handle_add(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(body)?;

    let outcome = match req.chunks {
        Some(chunks) => state.engine.ingest_chunks(chunks).await,
        None => {
            let text = req.text.unwrap_or_default();
            state.engine.ingest(&text).await
        }
    }
    .map_err(|e| classify_error(e, "Failed to add document"))?;

    Ok(success(outcome))
}

// ============ POST /api/embeddings/query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(body)?;
    let query = req.query.unwrap_or_default();

    let outcome = state
        .engine
        .query(&query)
        .await
        .map_err(|e| classify_error(e, "Failed to process query"))?;

    Ok(success(outcome))
}

// ============ /api/feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    rating: Option<i64>,
}

#[derive(Serialize)]
struct FeedbackCreated {
    message: &'static str,
    feedback_id: String,
}

async fn handle_submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(body)?;
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());

    let feedback = state
        .feedback
        .submit(req.message.as_deref(), req.rating, user_agent)
        .await
        .map_err(|e| classify_error(e, "Failed to submit feedback"))?;

    Ok((
        StatusCode::CREATED,
        success(FeedbackCreated {
            message: "Thank you for your feedback!",
            feedback_id: feedback.id,
        }),
    ))
}

#[derive(Serialize)]
struct FeedbackList {
    count: usize,
    feedbacks: Vec<Feedback>,
}

async fn handle_list_feedback(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let feedbacks = state
        .feedback
        .list()
        .await
        .map_err(|e| classify_error(e, "Failed to fetch feedback"))?;

    Ok(success(FeedbackList {
        count: feedbacks.len(),
        feedbacks,
    }))
}
