//! JSON HTTP transport for the answer engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness and version |
//! | `POST` | `/search` | `{"query", "k"?}` → ranked hits |
//! | `POST` | `/ask` | `{"query"}` → answer, status and citations |
//! | `GET`  | `/stats` | Index size and embedding model |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "service_unavailable", "message": "embedding service unavailable: ..." } }
//! ```
//!
//! `bad_request` (400) for invalid queries, `service_unavailable` (503) when
//! the embedding service, generation service or index cannot be reached,
//! `internal` (500) otherwise. "Nothing relevant found" is not an error: it
//! is a 200 with `"status": "no_relevant_context"`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::AnswerEngine;
use crate::error::Error;
use crate::models::{Citation, IndexStats, SearchHit};

#[derive(Clone)]
struct AppState {
    engine: Arc<AnswerEngine>,
}

/// Routes with CORS open to all origins.
pub fn router(engine: Arc<AnswerEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Bind `bind_addr` and serve until the process ends.
pub async fn run_server(engine: Arc<AnswerEngine>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "server listening");
    serve(listener, engine).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, engine: Arc<AnswerEngine>) -> anyhow::Result<()> {
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            e if e.is_fault() => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status != StatusCode::BAD_REQUEST {
            tracing::warn!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    hits: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let k = req.k.unwrap_or(state.engine.settings().top_k);
    let hits = state.engine.search(&req.query, k).await?;
    Ok(Json(SearchResponse { hits }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

#[derive(Serialize)]
struct AskResponse {
    status: &'static str,
    answer: Option<String>,
    citations: Vec<Citation>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let answer = state.engine.answer(&req.query).await?;
    Ok(Json(AskResponse {
        status: answer.status(),
        answer: answer.text().map(str::to_string),
        citations: answer.citations().to_vec(),
    }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    Ok(Json(state.engine.store().stats().await?))
}
