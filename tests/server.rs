//! Integration tests for the HTTP server: health endpoint, the admin
//! service CRUD surface, and graceful shutdown.

mod common;

use std::time::Duration;

use common::TestGateway;
use gatehouse::config::GatewaySettings;
use gatehouse::error::ErrorBody;
use gatehouse::health::HealthResponse;
use gatehouse::limit::RatePolicy;

fn settings() -> GatewaySettings {
    GatewaySettings {
        rate_general: RatePolicy {
            limit: 10_000,
            window: Duration::from_secs(60),
        },
        ..GatewaySettings::default()
    }
}

#[tokio::test]
async fn health_endpoint_returns_healthy() {
    let mut gw = TestGateway::start(settings()).await;

    let resp = reqwest::get(gw.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let health: HealthResponse = resp.json().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert!(health.store.enabled);
    assert!(health.store.connected);
    assert_eq!(health.stats.requests_forwarded, 0);
    assert_eq!(health.stats.requests_failed, 0);

    gw.shutdown();
}

#[tokio::test]
async fn health_stays_healthy_when_store_is_down() {
    let mut gw = TestGateway::start(settings()).await;
    gw.store.set_down(true);

    let resp = reqwest::get(gw.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let health: HealthResponse = resp.json().await.unwrap();
    assert_eq!(health.status, "healthy", "degraded mode is still serving");
    assert!(!health.store.connected);

    gw.shutdown();
}

#[tokio::test]
async fn admin_service_crud_round_trip() {
    let mut gw = TestGateway::start(settings()).await;
    let client = reqwest::Client::new();

    // Register
    let resp = client
        .post(gw.url("/admin/api/services"))
        .json(&serde_json::json!({"name": "user", "url": "http://localhost:3001"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // List
    let resp = client
        .get(gw.url("/admin/api/services"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let list: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["services"]["user"], "http://localhost:3001");

    // Remove
    let resp = client
        .delete(gw.url("/admin/api/services/user"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(gw.url("/admin/api/services"))
        .send()
        .await
        .unwrap();
    let list: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(list["count"], 0);

    gw.shutdown();
}

#[tokio::test]
async fn admin_rejects_bad_registrations() {
    let mut gw = TestGateway::start(settings()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(gw.url("/admin/api/services"))
        .json(&serde_json::json!({"name": "user", "url": "not-a-url"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "invalid_request");

    let resp = client
        .delete(gw.url("/admin/api/services/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "not_found");
    assert_eq!(body.service.as_deref(), Some("ghost"));

    gw.shutdown();
}

#[tokio::test]
async fn registration_fails_explicitly_during_outage() {
    let mut gw = TestGateway::start(settings()).await;
    gw.store.set_down(true);

    let client = reqwest::Client::new();
    let resp = client
        .post(gw.url("/admin/api/services"))
        .json(&serde_json::json!({"name": "user", "url": "http://localhost:3001"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "store_unavailable");

    gw.shutdown();
}

#[tokio::test]
async fn stats_reports_store_and_breakers() {
    let mut gw = TestGateway::start(settings()).await;
    gw.state.breakers.for_service("user");

    let resp = reqwest::get(gw.url("/admin/api/stats")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let stats: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(stats["gateway"]["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(stats["gateway"]["namespace"], "test");
    assert_eq!(stats["store"]["connected"], true);
    assert_eq!(stats["breakers"]["user"], "closed");

    gw.shutdown();
}

#[tokio::test]
async fn graceful_shutdown_works() {
    let mut gw = TestGateway::start(settings()).await;

    let url = gw.url("/health");
    assert!(reqwest::get(&url).await.is_ok());

    gw.shutdown();

    // Give it a moment to shut down
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();
    let result = client.get(&url).send().await;
    assert!(result.is_err());
}
