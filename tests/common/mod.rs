//! Shared fixtures for the integration tests: an in-memory `SharedStore`
//! with call counters and a switchable availability flag, a stub backend,
//! and a helper that serves the gateway on an ephemeral port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;

use gatehouse::config::GatewaySettings;
use gatehouse::server::{self, AppState};
use gatehouse::store::{ConnectionState, ConnectionStatus, SharedStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    kv: Mutex<HashMap<String, String>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    counters: Mutex<HashMap<String, (i64, Instant)>>,
    down: AtomicBool,
    pub hget_calls: AtomicU64,
    pub incr_calls: AtomicU64,
}

impl MemoryStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::Relaxed) {
            Err(StoreError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn is_available(&self) -> bool {
        !self.down.load(Ordering::Relaxed)
    }

    fn status(&self) -> ConnectionStatus {
        let mut state = ConnectionState::new(true);
        if self.is_available() {
            state.begin_connect();
            state.connect_succeeded();
        }
        state.status()
    }

    async fn connect(&self) {}
    async fn disconnect(&self) {}

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        _expiry: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.kv
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.kv.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.kv.lock().unwrap().contains_key(key))
    }

    async fn pttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        Ok(None)
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<(i64, Duration), StoreError> {
        self.check()?;
        self.incr_calls.fetch_add(1, Ordering::Relaxed);
        let mut counters = self.counters.lock().unwrap();
        let now = Instant::now();
        let entry = counters.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= window {
            *entry = (0, now);
        }
        entry.0 += 1;
        Ok((entry.0, window.saturating_sub(now.duration_since(entry.1))))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.hget_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.hashes
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.check()?;
        if let Some(h) = self.hashes.lock().unwrap().get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}

/// Gateway wired to a fresh `MemoryStore`, served on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestGateway {
    pub async fn start(settings: GatewaySettings) -> Self {
        let store = Arc::new(MemoryStore::default());
        let state = Arc::new(AppState::new(
            Arc::clone(&store) as Arc<dyn SharedStore>,
            settings,
            "test",
        ));

        let router = server::build_router(Arc::clone(&state), 1_048_576);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            store,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Stub backend with deterministic routes: `/ok` answers 200, `/fail`
/// answers 500, anything else echoes the method and URI it saw.
pub async fn start_backend() -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let router = axum::Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route(
            "/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .fallback(
            |method: axum::http::Method, uri: axum::http::Uri| async move {
                format!("{method} {uri}")
            },
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}
