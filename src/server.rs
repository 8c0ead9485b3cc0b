//! Read-only HTTP query API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/v1/{kind}/{value}` | Page of records for a username, domain or password |
//! | `GET`  | `/api/v1/emails/{email}` | All records for an exact `user@domain` |
//! | `GET`  | `/api/v1/breaches/{email}` | Breach history from the configured breach API |
//! | `GET`  | `/api/v1/cache/stats` | Response cache counters and TTLs |
//! | `DELETE` | `/api/v1/cache` | Drop every cached response |
//! | `DELETE` | `/api/v1/cache/{pattern}` | Drop cached responses whose key contains `pattern` |
//!
//! `{kind}` is one of `usernames`, `domains`, `passwords`. Paged routes accept
//! `?page=` (1-based) and `?per_page=` (clamped to `[server].max_per_page`).
//! Lookup and breach responses go through the [`crate::cache`] middleware.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "page must be >= 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream` (502),
//! `breach_unavailable` (503), `cache_disabled` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::breach::{Breach, BreachClient, BreachError};
use crate::cache::{self, CacheStats, ResponseCache};
use crate::config::Config;
use crate::db;
use crate::lookup::{self, Page};
use crate::models::{CredentialRow, EntityKind};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    config: Arc<Config>,
    breach: Arc<BreachClient>,
    cache: Arc<ResponseCache>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> anyhow::Result<Self> {
        let breach = BreachClient::new(&config.breach)?;
        let cache = ResponseCache::new(pool.clone(), config.cache.clone());
        Ok(Self {
            pool,
            config: Arc::new(config),
            breach: Arc::new(breach),
            cache: Arc::new(cache),
        })
    }
}

/// Builds the API router. Exposed separately from [`run_server`] so tests
/// can drive it without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let cache_layer =
        middleware::from_fn_with_state(Arc::clone(&state.cache), cache::cache_middleware);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/cache", delete(handle_cache_clear))
        .route("/api/v1/cache/stats", get(handle_cache_stats))
        .route("/api/v1/cache/{pattern}", delete(handle_cache_clear_pattern))
        .route("/api/v1/emails/{email}", get(handle_email))
        .route("/api/v1/breaches/{email}", get(handle_breaches))
        .route("/api/v1/{kind}/{value}", get(handle_lookup))
        .layer(cache_layer)
        .layer(cors)
        .with_state(state)
}

/// Starts the query server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect_initialized(config).await?;
    let state = AppState::new(pool.clone(), config.clone())?;
    if !state.breach.is_configured() {
        warn!("no breach API key configured; /api/v1/breaches will return 503");
    }
    if !state.cache.is_enabled() {
        info!("response cache disabled");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "query server listening");
    println!("passdb server listening on http://{}", bind_addr);

    let result = axum::serve(listener, router(state)).await;
    pool.close().await;
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
    code: &'static str,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        error!(error = %e, "query failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "database query failed".to_string(),
        }
    }
}

impl From<BreachError> for AppError {
    fn from(e: BreachError) -> Self {
        let (status, code) = match &e {
            BreachError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, "breach_unavailable"),
            BreachError::Upstream(_) | BreachError::Request(_) => {
                (StatusCode::BAD_GATEWAY, "upstream")
            }
        };
        warn!(error = %e, "breach lookup failed");
        AppError {
            status,
            code,
            message: e.to_string(),
        }
    }
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

// ============ GET /api/v1/{kind}/{value} ============

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<u32>,
    per_page: Option<u32>,
}

/// One handler for all three entity kinds. The path segment is the plural
/// table name.
async fn handle_lookup(
    State(state): State<AppState>,
    Path((kind, value)): Path<(String, String)>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<CredentialRow>>, AppError> {
    let kind = match kind.as_str() {
        "usernames" => EntityKind::Username,
        "domains" => EntityKind::Domain,
        "passwords" => EntityKind::Password,
        other => return Err(not_found(format!("no such collection: {}", other))),
    };

    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let page = Page::new(params.page, params.per_page, &state.config.server)
        .map_err(bad_request)?;

    let rows = lookup::lookup(&state.pool, kind, &value, page).await?;
    Ok(Json(rows))
}

// ============ GET /api/v1/emails/{email} ============

async fn handle_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Vec<CredentialRow>>, AppError> {
    match lookup::records_by_email(&state.pool, &email).await? {
        Some(rows) => Ok(Json(rows)),
        None => Err(bad_request(format!(
            "'{}' is not an email address (no '@')",
            email
        ))),
    }
}

// ============ GET /api/v1/breaches/{email} ============

async fn handle_breaches(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Vec<Breach>>, AppError> {
    let breaches = state.breach.breached_account(&email).await?;
    Ok(Json(breaches))
}

// ============ /api/v1/cache ============

#[derive(Serialize)]
struct ClearResponse {
    cleared: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
}

fn require_cache(state: &AppState) -> Result<(), AppError> {
    if state.cache.is_enabled() {
        Ok(())
    } else {
        Err(AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "cache_disabled",
            message: "response cache is disabled".to_string(),
        })
    }
}

async fn handle_cache_stats(State(state): State<AppState>) -> Result<Json<CacheStats>, AppError> {
    Ok(Json(state.cache.stats().await?))
}

async fn handle_cache_clear(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, AppError> {
    require_cache(&state)?;
    let cleared = state.cache.clear().await?;
    info!(cleared, "response cache cleared");
    Ok(Json(ClearResponse {
        cleared,
        pattern: None,
    }))
}

async fn handle_cache_clear_pattern(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> Result<Json<ClearResponse>, AppError> {
    require_cache(&state)?;
    let cleared = state.cache.clear_matching(&pattern).await?;
    info!(cleared, pattern = %pattern, "cached responses cleared");
    Ok(Json(ClearResponse {
        cleared,
        pattern: Some(pattern),
    }))
}
