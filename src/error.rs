//! Unified error types for Gatehouse.
//!
//! Defines [`GatewayError`] (the main crate error enum) and [`ErrorBody`],
//! the machine-parseable JSON payload returned for every user-visible
//! failure. Each payload carries a stable error code, a human-readable
//! message, and (where applicable) the affected service name — never a raw
//! transport error or store protocol detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("shared store unavailable")]
    StoreUnavailable,

    #[error("service '{0}' is not registered")]
    ServiceNotFound(String),

    #[error("service '{0}' is unavailable")]
    ServiceUnavailable(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("invalid service name '{0}'")]
    InvalidServiceName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid service URL '{url}': {reason}")]
    InvalidServiceUrl { url: String, reason: String },

    #[error("Invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URI: {source}")]
    UriParse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP request failed: {source}")]
    HttpRequest {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Health check failed with status {0}")]
    HealthCheckFailed(hyper::StatusCode),
}

impl GatewayError {
    /// Stable machine-parseable code for the user-visible taxonomy.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable => "store_unavailable",
            Self::ServiceNotFound(_) => "not_found",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidServiceName(_)
            | Self::InvalidServiceUrl { .. }
            | Self::InvalidRequest(_) => "invalid_request",
            _ => "internal_error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::StoreUnavailable | Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidServiceName(_)
            | Self::InvalidServiceUrl { .. }
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn service(&self) -> Option<String> {
        match self {
            Self::ServiceNotFound(name) | Self::ServiceUnavailable(name) => Some(name.clone()),
            _ => None,
        }
    }
}

/// JSON body for every error response the gateway produces.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code: `not_found`, `service_unavailable`, `rate_limited`,
    /// `store_unavailable`, `invalid_request`, or `internal_error`.
    pub error: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: code.to_string(),
            message: message.into(),
            service: None,
        }
    }

    #[must_use]
    pub fn for_service(code: &str, message: impl Into<String>, service: &str) -> Self {
        Self {
            error: code.to_string(),
            message: message.into(),
            service: Some(service.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            service: self.service(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Build an error response without going through [`GatewayError`], for
/// handlers that already know the code, status, and message.
pub fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
    service: Option<&str>,
) -> Response {
    let mut body = ErrorBody::new(code, message);
    body.service = service.map(String::from);
    (status, Json(body)).into_response()
}
