//! HTTP boundary over a single shared [`ChatBot`].
//!
//! The bot is built once at startup and handed to every handler through
//! axum `State`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer `{message, company_name?, company_type?, structured?}` |
//! | `POST` | `/ingest` | Ingest `{dir?}` (defaults to `docs.dir`); one at a time |
//! | `POST` | `/clear` | Delete every indexed record |
//! | `GET`  | `/ready` | Readiness of the pipeline |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "documents have not been processed yet" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `ingest_in_progress` | 409 |
//! | `generation_failed`, `malformed_response`, `embedding_failed` | 502 |
//! | `not_ready`, `index_unavailable` | 503 |
//! | `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::bot::ChatBot;
use crate::config::Config;
use crate::error::RagError;
use crate::models::{ChatRequest, ChatResponse, IngestResult};

/// Shared application state.
pub struct AppState {
    pub bot: Arc<ChatBot>,
    /// Held for the duration of an ingestion.
    pub ingest_lock: Mutex<()>,
    /// Directory ingested when a request names none.
    pub docs_dir: PathBuf,
}

impl AppState {
    pub fn new(bot: Arc<ChatBot>, docs_dir: PathBuf) -> Self {
        Self {
            bot,
            ingest_lock: Mutex::new(()),
            docs_dir,
        }
    }
}

/// Build the router. Exposed separately from [`run_server`] so it can be
/// driven in-process.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/ingest", post(handle_ingest))
        .route("/clear", post(handle_clear))
        .route("/ready", get(handle_ready))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Build the bot from `config`, ingest `docs.dir` if the index is empty and
/// `ingest_on_start` is set, then serve on
/// `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bot = Arc::new(ChatBot::from_config(config).await?);
    let state = Arc::new(AppState::new(bot, config.docs.dir.clone()));

    if config.server.ingest_on_start {
        startup_ingest(&state).await;
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Ingest `docs_dir` unless the index already holds documents from an
/// earlier run. Returns `None` when skipped or when ingestion errored.
pub async fn startup_ingest(state: &AppState) -> Option<IngestResult> {
    let _guard = state.ingest_lock.lock().await;
    if state.bot.is_ready().await {
        tracing::info!("index already populated, skipping startup ingestion");
        return None;
    }
    match state.bot.ingest(&state.docs_dir).await {
        Ok(result) => {
            if result.success {
                tracing::info!(records = result.records, "startup ingestion complete");
            } else {
                tracing::warn!(reason = %result.reason, "startup ingestion did nothing");
            }
            Some(result)
        }
        Err(e) => {
            tracing::error!(error = %e, "startup ingestion failed");
            None
        }
    }
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

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
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

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            RagError::IndexUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable"),
            RagError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            RagError::MalformedResponse { .. } => (StatusCode::BAD_GATEWAY, "malformed_response"),
            RagError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, code, "request failed");
        }
        AppError::new(status, code, err.to_string())
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

// ============ GET /ready ============

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
}

async fn handle_ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: state.bot.is_ready().await,
    })
}

// ============ POST /chat ============

#[derive(Serialize)]
struct ChatReply {
    response: ChatResponse,
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "message must not be empty",
        ));
    }
    let response = state.bot.answer(&request).await?;
    Ok(Json(ChatReply { response }))
}

// ============ POST /ingest ============

#[derive(Deserialize, Default)]
struct IngestRequest {
    #[serde(default)]
    dir: Option<PathBuf>,
}

/// An empty body ingests `docs.dir`.
async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IngestResult>, AppError> {
    let request: IngestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, "bad_request", e.to_string()))?
    };

    let Ok(_guard) = state.ingest_lock.try_lock() else {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            "ingest_in_progress",
            "an ingestion is already running",
        ));
    };

    let dir = request.dir.unwrap_or_else(|| state.docs_dir.clone());
    let result = state.bot.ingest(&dir).await?;
    Ok(Json(result))
}

// ============ POST /clear ============

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
}

async fn handle_clear(State(state): State<Arc<AppState>>) -> Json<ClearResponse> {
    Json(ClearResponse {
        success: state.bot.clear().await,
    })
}
