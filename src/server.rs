//! Read-only HTTP query server.
//!
//! Answers "which of these seeds do we already have" and "which of these
//! candidate variations are new for this seed" against the canonical store.
//! Both compare by normalized text and reply with the caller's raw strings.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Health check (returns version) |
//! | `POST` | `/seeds/exists` | Existence and variation count per seed |
//! | `POST` | `/seeds/diff` | Partition candidates into existing / new |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "seeds must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use seed_pipeline_core::normalize::Normalizer;
use seed_pipeline_core::query::{seed_diff, seeds_exist, SeedDiff, SeedExistence};
use seed_pipeline_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    normalizer: Normalizer,
}

/// Build the router over any store. Used by [`run_server`] and by tests.
pub fn router(store: Arc<dyn Store>, normalizer: Normalizer) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handle_health))
        .route("/seeds/exists", post(handle_exists))
        .route("/seeds/diff", post(handle_diff))
        .layer(cors)
        .with_state(AppState { store, normalizer })
}

/// Open the configured database and serve until the process is terminated.
///
/// Uses the same normalization settings as ingest (`[ingest] collapse_repeats`)
/// so lookups match what was stored.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(config).await?;
    let app = router(Arc::new(store.clone()), config.ingest.normalizer());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "query server listening");
    println!("Query server listening on http://{}", config.server.bind);

    let result = axum::serve(listener, app).await;
    store.close().await;
    result?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "query failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET /healthz ============

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

// ============ POST /seeds/exists ============

#[derive(Deserialize)]
struct ExistsRequest {
    seeds: Vec<String>,
}

/// Handler for `POST /seeds/exists`. Results follow request order.
async fn handle_exists(
    State(state): State<AppState>,
    body: Result<Json<ExistsRequest>, JsonRejection>,
) -> Result<Json<Vec<SeedExistence>>, AppError> {
    let Json(req) = body?;
    if req.seeds.is_empty() {
        return Err(bad_request("seeds must not be empty"));
    }

    let result = seeds_exist(state.store.as_ref(), &state.normalizer, &req.seeds).await?;
    Ok(Json(result))
}

// ============ POST /seeds/diff ============

#[derive(Deserialize)]
struct DiffRequest {
    seed: String,
    variations: Vec<String>,
}

/// Handler for `POST /seeds/diff`. An unknown seed makes every candidate new.
async fn handle_diff(
    State(state): State<AppState>,
    body: Result<Json<DiffRequest>, JsonRejection>,
) -> Result<Json<SeedDiff>, AppError> {
    let Json(req) = body?;
    if req.variations.is_empty() {
        return Err(bad_request("variations must not be empty"));
    }

    let diff = seed_diff(
        state.store.as_ref(),
        &state.normalizer,
        &req.seed,
        &req.variations,
    )
    .await?;
    Ok(Json(diff))
}
