//! Tower/axum middleware layers.
//!
//! [`rate_limit`] runs in front of every route (including dispatch and the
//! admin surface) and applies the fixed-window limiter from
//! [`limit`](crate::limit). Identity is the client IP — the first hop of
//! `x-forwarded-for` when an upstream proxy supplied one, the peer address
//! otherwise. Paths under `/auth` use the stricter auth policy. Standard
//! `ratelimit-*` headers are attached to every response so well-behaved
//! clients can pace themselves.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::error_response;
use crate::limit::RateDecision;
use crate::server::AppState;

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&request, addr);

    let (scope, policy) = if request.uri().path().starts_with("/auth") {
        ("auth", state.settings.rate_auth)
    } else {
        ("general", state.settings.rate_general)
    };

    let decision = state.limiter.check(scope, &identity, policy).await;

    if !decision.allowed {
        state.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(identity = %identity, scope, "rate limit exceeded");
        let message = if scope == "auth" {
            "Too many authentication attempts, please try again later."
        } else {
            "Too many requests, please try again later."
        };
        let mut response =
            error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message, None);
        apply_headers(&mut response, decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, decision);
    response
}

fn client_identity(request: &Request, addr: SocketAddr) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map_or_else(|| addr.ip().to_string(), String::from)
}

fn apply_headers(response: &mut Response, decision: RateDecision) {
    let headers = response.headers_mut();
    if let Ok(val) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("ratelimit-limit", val);
    }
    if let Ok(val) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("ratelimit-remaining", val);
    }
    if let Ok(val) = HeaderValue::from_str(&decision.reset_after.as_secs().to_string()) {
        headers.insert("ratelimit-reset", val);
    }
}
