//! API Handlers
//!
//! HTTP request handlers for each cache endpoint.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::models::{
    ErrorResponse, GetResponse, HealthResponse, ResetResponse, SetRequest, SetResponse,
    StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cache handle; clones share state
    pub cache: Cache,
}

impl AppState {
    /// Creates a new AppState around an existing cache.
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    ///
    /// The cache still needs `init()` before file-backed requests succeed.
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Ok(Self::new(Cache::new(config.clone())?))
    }
}

/// Handler for PUT /set
///
/// Stores a value with an optional TTL in milliseconds.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidKey(error_msg));
    }

    state
        .cache
        .set(&req.key, req.value, req.ttl.map(Duration::from_millis))
        .await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Returns the value, or 404 when the key is absent or expired.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    match state.cache.get(&key).await? {
        Some(value) => Ok(Json(GetResponse::new(key, value)).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("Key not found: {}", key))),
        )
            .into_response()),
    }
}

/// Handler for DELETE /del/:key
///
/// Resets a key. Absent keys succeed as well.
pub async fn reset_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ResetResponse>> {
    state.cache.reset(&key).await?;
    Ok(Json(ResetResponse::new(key)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats().await))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(
        state.cache.process_id(),
        state.cache.is_file_backed().await,
    ))
}
