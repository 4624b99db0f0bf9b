//! API Handlers
//!
//! HTTP request handlers for the cache inspection endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::debug;

use crate::cache::{CacheStore, PersistentStore};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::manager::CacheManager;
use crate::models::{
    GetResponse, HealthResponse, KeysResponse, MessageResponse, SetRequest, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The manager is internally synchronized, so handlers only clone the `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
}

impl AppState {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Creates a new AppState from configuration over the given backing store.
    ///
    /// The manager takes its default retry policy and batch width from
    /// `config`.
    pub fn from_config(config: &Config, backing: Arc<dyn PersistentStore>) -> Self {
        let store = CacheStore::new(backing, config.store_config());
        Self::new(Arc::new(CacheManager::from_config(Arc::new(store), config)))
    }

    fn store(&self) -> &Arc<CacheStore> {
        self.manager.store()
    }
}

/// Handler for PUT /cache
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<MessageResponse>> {
    let opts = req.options();
    state.store().set(&req.key, req.value, opts)?;

    Ok(Json(MessageResponse::stored(&req.key)))
}

/// Handler for GET /cache/:key
///
/// Reads through both tiers; a miss is a 404.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.store().get(&key).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => {
            debug!(key = %key, "miss");
            Err(CacheError::NotFound(key))
        }
    }
}

/// Handler for DELETE /cache/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<MessageResponse> {
    state.manager.invalidate(&key).await;
    Json(MessageResponse::deleted(&key))
}

/// Handler for DELETE /cache
pub async fn clear_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    state.manager.clear().await;
    Json(MessageResponse::cleared())
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.store().keys().await))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.manager.stats();
    Json(StatsResponse::from(&stats))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
