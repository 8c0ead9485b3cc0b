//! Response cache for the query API.
//!
//! Successful `GET` responses on the lookup and breach routes are stored in
//! the `response_cache` table and replayed until their TTL runs out. The key
//! is the method plus the request target, query string included, so every
//! page of a lookup is cached on its own. Breach answers live for
//! `[cache].breach_ttl_secs` and lookups for `[cache].lookup_ttl_secs`.
//!
//! Every response that passes through a cached route carries
//! `X-Cache: HIT` or `X-Cache: MISS`. Error responses are never stored.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::CacheConfig;

pub const CACHE_STATUS_HEADER: &str = "x-cache";

const BREACH_PREFIX: &str = "/api/v1/breaches/";
const LOOKUP_PREFIXES: [&str; 4] = [
    "/api/v1/usernames/",
    "/api/v1/domains/",
    "/api/v1/passwords/",
    "/api/v1/emails/",
];

fn cache_key(target: &str) -> String {
    format!("GET {}", target)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheSettings {
    pub breach_ttl_secs: u64,
    pub lookup_ttl_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    /// Stored responses, expired ones included.
    pub total_entries: u64,
    /// Entries past their TTL, waiting to be overwritten or cleared.
    pub expired_entries: u64,
    /// Entry count per cached route prefix.
    pub entries_by_route: BTreeMap<String, u64>,
    pub configuration: CacheSettings,
}

pub struct ResponseCache {
    pool: SqlitePool,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(pool: SqlitePool, config: CacheConfig) -> Self {
        Self { pool, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// How long a response for `path` is kept, or `None` when the path is
    /// not cached at all.
    pub fn ttl_for(&self, path: &str) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        if path.starts_with(BREACH_PREFIX) {
            Some(Duration::from_secs(self.config.breach_ttl_secs))
        } else if LOOKUP_PREFIXES.iter().any(|p| path.starts_with(p)) {
            Some(Duration::from_secs(self.config.lookup_ttl_secs))
        } else {
            None
        }
    }

    /// The stored body for `key`, unless it has expired.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar("SELECT body FROM response_cache WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(chrono::Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn put(&self, key: &str, body: &[u8], ttl: Duration) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO response_cache (key, body, stored_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                stored_at = excluded.stored_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(body)
        .bind(now)
        .bind(now + ttl.as_secs() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats, sqlx::Error> {
        let (total, expired): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(expires_at <= ?), 0) FROM response_cache",
        )
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        let mut entries_by_route = BTreeMap::new();
        for prefix in std::iter::once(BREACH_PREFIX).chain(LOOKUP_PREFIXES) {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM response_cache WHERE instr(key, ?) = 1")
                    .bind(cache_key(prefix))
                    .fetch_one(&self.pool)
                    .await?;
            if count > 0 {
                entries_by_route.insert(prefix.to_string(), count as u64);
            }
        }

        Ok(CacheStats {
            enabled: self.config.enabled,
            total_entries: total as u64,
            expired_entries: expired as u64,
            entries_by_route,
            configuration: CacheSettings {
                breach_ttl_secs: self.config.breach_ttl_secs,
                lookup_ttl_secs: self.config.lookup_ttl_secs,
            },
        })
    }

    /// Drops every entry. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drops entries whose key contains `pattern` as a plain substring.
    pub async fn clear_matching(&self, pattern: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM response_cache WHERE instr(key, ?) > 0")
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Drops every cached response except breach answers. Run after an ingest
/// that added records.
pub async fn clear_lookups(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM response_cache WHERE instr(key, ?) != 1")
        .bind(cache_key(BREACH_PREFIX))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Axum middleware serving cached routes from [`ResponseCache`].
pub async fn cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }
    let Some(ttl) = cache.ttl_for(req.uri().path()) else {
        return next.run(req).await;
    };

    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| req.uri().path());
    let key = cache_key(target);

    match cache.get(&key).await {
        Ok(Some(body)) => {
            debug!(key = %key, "cache hit");
            return (
                [("content-type", "application/json"), (CACHE_STATUS_HEADER, "HIT")],
                body,
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "cache read failed"),
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %key, error = %e, "failed to buffer response for cache");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match cache.put(&key, &bytes, ttl).await {
        Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "cached response"),
        Err(e) => warn!(key = %key, error = %e, "cache write failed"),
    }

    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}
