//! Core dispatch: `/api/{service}/{rest}` to a dynamically resolved backend.
//!
//! The [`dispatch_handler`] function is the Axum fallback that receives
//! every request no explicit route claimed. It resolves the logical service
//! name through the registry, consults that service's circuit breaker, and
//! forwards the request with the path rewritten to strip the
//! `/api/{service}` prefix. Unknown services are a routing error and never
//! touch the breaker map; transport failures and timeouts are recorded
//! against the breaker and surfaced as a generic "service unavailable"
//! body, never as a raw transport error.

pub mod headers;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use http_body_util::Full;

use crate::error::error_response;
use crate::server::AppState;

#[allow(clippy::too_many_lines, clippy::cast_possible_truncation)]
pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = req_headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    let Some((service, rest)) = split_api_path(uri.path()) else {
        tracing::debug!(
            correlation_id = %correlation_id,
            method = %method,
            path = %uri.path(),
            "no route matched"
        );
        return error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            "no such route",
            None,
        );
    };

    // Resolution comes first: an unknown service is a routing error, not a
    // backend failure, and must not create a breaker entry.
    let Some(resolved) = state.registry.get(service).await else {
        tracing::warn!(
            correlation_id = %correlation_id,
            service,
            "dispatch to unregistered service"
        );
        return error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("service '{service}' is not registered"),
            Some(service),
        );
    };

    let target = build_target(&resolved.url, rest, uri.query());
    let Ok(parsed_url) = url::Url::parse(&target) else {
        // The base URL was validated at registration; reaching this means a
        // corrupt registry record, not a backend fault, so no breaker is
        // consulted or charged.
        tracing::error!(correlation_id = %correlation_id, service, target, "invalid target URL");
        return error_response(
            StatusCode::BAD_GATEWAY,
            "internal_error",
            "invalid backend address",
            Some(service),
        );
    };

    let breaker = state.breakers.for_service(service);
    if !breaker.try_acquire() {
        state.stats.short_circuited.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            correlation_id = %correlation_id,
            service,
            "circuit open, shedding request"
        );
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            format!("service '{service}' is unavailable"),
            Some(service),
        );
    }

    if resolved.stale {
        tracing::debug!(
            correlation_id = %correlation_id,
            service,
            "dispatching against stale registry entry"
        );
    }

    let client_ip = addr.ip().to_string();
    let forwarded_headers =
        headers::build_forwarded_headers(&req_headers, &client_ip, &parsed_url, &correlation_id);

    let mut req_builder = hyper::Request::builder().method(method).uri(target.clone());
    for (key, value) in &forwarded_headers {
        req_builder = req_builder.header(key, value);
    }
    let req = match req_builder.body(Full::new(body)) {
        Ok(r) => r,
        Err(e) => {
            // The attempt was admitted by the breaker, so its outcome must
            // be recorded — otherwise a half-open probe slot would leak.
            breaker.record_failure();
            tracing::error!(correlation_id = %correlation_id, error = %e, "failed to build upstream request");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "internal_error",
                "failed to build upstream request",
                Some(service),
            );
        }
    };

    let start = Instant::now();
    let result = tokio::time::timeout(
        state.settings.dispatch_timeout,
        state.http_client.request(req),
    )
    .await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(response)) => {
            let status = response.status();
            let mut resp_headers = response.headers().clone();

            let body_bytes = match response.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    // The backend died mid-body: a transport failure.
                    breaker.record_failure();
                    state.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        service,
                        error = %e,
                        latency_ms,
                        "upstream body read failed"
                    );
                    return error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "service_unavailable",
                        format!("service '{service}' is unavailable"),
                        Some(service),
                    );
                }
            };

            // A server-class status counts against the breaker, but the
            // backend's own response is still the client's answer.
            if status.is_server_error() {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
            state.stats.forwarded.fetch_add(1, Ordering::Relaxed);

            tracing::info!(
                correlation_id = %correlation_id,
                service,
                status = status.as_u16(),
                latency_ms,
                "request forwarded"
            );

            headers::strip_response_hop_by_hop(&mut resp_headers);
            let mut builder = Response::builder().status(status);
            for (key, value) in &resp_headers {
                builder = builder.header(key, value);
            }
            builder
                .header("x-correlation-id", &correlation_id)
                .body(axum::body::Body::from(body_bytes))
                .unwrap_or_else(|e| {
                    tracing::error!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "failed to build response"
                    );
                    StatusCode::BAD_GATEWAY.into_response()
                })
        }
        Ok(Err(e)) => {
            breaker.record_failure();
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                correlation_id = %correlation_id,
                service,
                error = %e,
                latency_ms,
                "upstream request failed"
            );
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                format!("service '{service}' is unavailable"),
                Some(service),
            )
        }
        Err(_) => {
            breaker.record_failure();
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                correlation_id = %correlation_id,
                service,
                timeout_ms = state.settings.dispatch_timeout.as_millis() as u64,
                "upstream request timed out"
            );
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                format!("service '{service}' is unavailable"),
                Some(service),
            )
        }
    }
}

/// Split `/api/{service}/{rest}` into the service name and the rewritten
/// path. The rest keeps its leading slash (`/api/user` rewrites to an empty
/// path, `/api/user/profile` to `/profile`).
fn split_api_path(path: &str) -> Option<(&str, &str)> {
    let after = path.strip_prefix("/api/")?;
    if after.is_empty() {
        return None;
    }
    match after.find('/') {
        Some(idx) => Some((&after[..idx], &after[idx..])),
        None => Some((after, "")),
    }
}

fn build_target(base: &str, rest: &str, query: Option<&str>) -> String {
    let mut target = format!("{}{rest}", base.trim_end_matches('/'));
    if let Some(q) = query {
        target.push('?');
        target.push_str(q);
    }
    target
}
