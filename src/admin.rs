//! Administrative surface: service CRUD over the registry, runtime stats,
//! and the token-revocation endpoint.
//!
//! Thin handlers — validation and fallback policy live in the components
//! they call. Registration writes must reach the shared store, so these
//! endpoints fail with `store_unavailable` during an outage instead of
//! pretending the mutation took.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerState;
use crate::error::GatewayError;
use crate::server::AppState;
use crate::store::ConnectionStatus;

/// Revoked access tokens stay listed for the access-token lifetime; after
/// that they are expired anyway.
const REVOCATION_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceBody {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterServiceResponse {
    pub success: bool,
    pub message: String,
    pub service: ServiceBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceListResponse {
    pub success: bool,
    pub count: usize,
    pub services: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub gateway: GatewayInfo,
    pub store: ConnectionStatus,
    pub services: ServiceInfo,
    pub breakers: HashMap<String, BreakerState>,
    pub requests: RequestCounters,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub version: String,
    pub uptime_seconds: u64,
    pub namespace: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// `None` when the store is unreachable and the count is unknown.
    pub registered: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestCounters {
    pub forwarded: u64,
    pub failed: u64,
    pub short_circuited: u64,
    pub rate_limited: u64,
}

pub async fn register_service(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterServiceRequest>,
) -> Result<Response, GatewayError> {
    state.registry.set(&body.name, &body.url).await?;

    let response = RegisterServiceResponse {
        success: true,
        message: "Service registered successfully".into(),
        service: ServiceBody {
            name: body.name,
            url: body.url,
        },
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServiceListResponse>, GatewayError> {
    let services = state.registry.all().await?;
    Ok(Json(ServiceListResponse {
        success: true,
        count: services.len(),
        services,
    }))
}

pub async fn remove_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RegisterServiceResponse>, GatewayError> {
    let Some(resolved) = state.registry.get(&name).await else {
        return Err(GatewayError::ServiceNotFound(name));
    };

    state.registry.remove(&name).await?;

    Ok(Json(RegisterServiceResponse {
        success: true,
        message: "Service removed successfully".into(),
        service: ServiceBody {
            name,
            url: resolved.url,
        },
    }))
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let registered = match state.registry.all().await {
        Ok(services) => Some(services.len()),
        Err(_) => None,
    };

    Json(StatsResponse {
        gateway: GatewayInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            namespace: state.namespace.clone(),
        },
        store: state.store.status(),
        services: ServiceInfo { registered },
        breakers: state.breakers.states(),
        requests: RequestCounters {
            forwarded: state.stats.forwarded.load(Ordering::Relaxed),
            failed: state.stats.failed.load(Ordering::Relaxed),
            short_circuited: state.stats.short_circuited.load(Ordering::Relaxed),
            rate_limited: state.stats.rate_limited.load(Ordering::Relaxed),
        },
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /auth/logout` — put the presented bearer token on the revocation
/// list. Token *verification* belongs to the auth collaborator; the gateway
/// only owns the revocation record.
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, GatewayError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return Err(GatewayError::InvalidRequest("missing bearer token".into()));
    };

    state
        .tokens
        .revoke(token, REVOCATION_TTL)
        .await
        .map_err(|_| GatewayError::StoreUnavailable)?;

    Ok(Json(LogoutResponse {
        success: true,
        message: "Logged out".into(),
    }))
}
