//! `GET /health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload containing the server version,
//! uptime, shared store connection summary, and cumulative request
//! statistics. The endpoint reports `healthy` even while the store is down:
//! the gateway keeps serving in degraded mode, and the store block tells
//! the operator which mode that is.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealth,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct StoreHealth {
    pub enabled: bool,
    pub connected: bool,
    pub reconnect_attempts: u32,
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
    pub requests_short_circuited: u64,
    pub requests_rate_limited: u64,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.store.status();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealth {
            enabled: store.enabled,
            connected: store.connected,
            reconnect_attempts: store.reconnect_attempts,
        },
        stats: StatsResponse {
            requests_forwarded: state.stats.forwarded.load(Ordering::Relaxed),
            requests_failed: state.stats.failed.load(Ordering::Relaxed),
            requests_short_circuited: state.stats.short_circuited.load(Ordering::Relaxed),
            requests_rate_limited: state.stats.rate_limited.load(Ordering::Relaxed),
        },
    })
}
