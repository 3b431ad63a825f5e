//! Redis-backed [`SharedStore`] over a single multiplexed Tokio connection.
//!
//! [`RedisStore`] owns the process-wide connection, its
//! [`ConnectionState`], and a background reconnect worker. The worker is
//! woken whenever a connect attempt fails or an in-flight command loses the
//! connection, and retries with exponential backoff (base 1s, cap 30s).
//! After `max_reconnect_attempts` consecutive failures it goes back to
//! sleep; the next store operation re-wakes it, so the client self-heals on
//! renewed traffic without retry-storming during an extended outage.
//!
//! Repeated identical failure messages are throttled to one log line per
//! interval; a new error class and every successful connect log immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::{Notify, RwLock};

use super::{ConnectionState, ConnectionStatus, SharedStore, StoreError};

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub enabled: bool,
    pub max_reconnect_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub log_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            enabled: true,
            max_reconnect_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            log_interval: Duration::from_secs(15),
        }
    }
}

pub struct RedisStore {
    settings: StoreSettings,
    conn: RwLock<Option<MultiplexedConnection>>,
    state: Mutex<ConnectionState>,
    throttle: Mutex<LogThrottle>,
    wake: Notify,
    closed: AtomicBool,
}

impl RedisStore {
    /// Create the store and spawn its reconnect worker. Does not connect;
    /// call [`SharedStore::connect`] for the initial attempt.
    #[must_use]
    pub fn new(settings: StoreSettings) -> Arc<Self> {
        let store = Arc::new(Self {
            state: Mutex::new(ConnectionState::new(settings.enabled)),
            throttle: Mutex::new(LogThrottle::new(settings.log_interval)),
            conn: RwLock::new(None),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            settings,
        });

        if store.settings.enabled {
            let worker = Arc::clone(&store);
            tokio::spawn(async move { worker.reconnect_loop().await });
        }

        store
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn warn_throttled(&self, message: &str, context: &'static str) {
        let admit = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(message);
        if admit {
            tracing::warn!(error = %message, "{context}");
        }
    }

    /// One connect attempt. Returns whether the store is connected
    /// afterwards. Skips (without an attempt) when already connected or
    /// another attempt is in flight.
    async fn try_connect(&self) -> bool {
        {
            let mut state = self.state();
            if !state.begin_connect() {
                return state.connected;
            }
        }

        let result = async {
            let client = redis::Client::open(self.settings.url.as_str())?;
            client.get_multiplexed_async_connection().await
        }
        .await;

        match result {
            Ok(conn) => {
                *self.conn.write().await = Some(conn);
                self.state().connect_succeeded();
                tracing::info!("shared store connected");
                true
            }
            Err(e) => {
                let message = e.to_string();
                self.state().record_failure(&message);
                self.warn_throttled(&message, "shared store connection failed");
                false
            }
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            if self.closed.load(Ordering::Relaxed) {
                return;
            }

            loop {
                let delay = {
                    let mut state = self.state();
                    if state.connected || !state.enabled {
                        break;
                    }
                    if state.reconnect_attempts >= self.settings.max_reconnect_attempts {
                        // Stop auto-scheduling; the next store call re-wakes
                        // the worker with a fresh counter.
                        state.reconnect_attempts = 0;
                        tracing::warn!(
                            attempts = self.settings.max_reconnect_attempts,
                            "shared store reconnect limit reached, pausing until next use"
                        );
                        break;
                    }
                    state.reconnect_attempts += 1;
                    backoff_delay(
                        state.reconnect_attempts,
                        self.settings.base_delay,
                        self.settings.max_delay,
                    )
                };

                tokio::time::sleep(delay).await;
                if self.closed.load(Ordering::Relaxed) {
                    return;
                }
                if self.try_connect().await {
                    break;
                }
            }
        }
    }

    /// Current connection handle, or a fast `NotConnected` failure. A miss
    /// also wakes the reconnect worker so renewed traffic restarts the
    /// retry cycle.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if !self.settings.enabled {
            return Err(StoreError::Disabled);
        }
        if let Some(conn) = self.conn.read().await.clone() {
            return Ok(conn);
        }
        self.wake.notify_one();
        Err(StoreError::NotConnected)
    }

    async fn mark_disconnected(&self, message: &str) {
        *self.conn.write().await = None;
        self.state().record_failure(message);
        self.warn_throttled(message, "shared store connection lost");
        self.wake.notify_one();
    }

    /// Normalize a command result: connection-level failures flip the client
    /// to disconnected and wake the worker; command-level failures pass
    /// through as `StoreError::Command`.
    async fn finish<T>(&self, result: redis::RedisResult<T>) -> Result<T, StoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if is_connection_error(&e) => {
                self.mark_disconnected(&e.to_string()).await;
                Err(StoreError::NotConnected)
            }
            Err(e) => {
                let message = e.to_string();
                self.warn_throttled(&message, "shared store command failed");
                Err(StoreError::Command(message))
            }
        }
    }
}

fn is_connection_error(e: &redis::RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_connection_refusal()
        || e.is_io_error()
        || e.is_timeout()
        || e.is_unrecoverable_error()
}

/// delay(n) = min(base * 2^(n-1), max) for attempt n >= 1.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    // Cap the exponent; past ~2^16 every realistic base exceeds the max.
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << exp).min(max)
}

/// Suppresses repeats of the same message within `interval`. A different
/// message always passes and becomes the new reference.
struct LogThrottle {
    interval: Duration,
    last: Option<(String, Instant)>,
}

impl LogThrottle {
    const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn admit(&mut self, message: &str) -> bool {
        let now = Instant::now();
        let repeat_within_interval = self
            .last
            .as_ref()
            .is_some_and(|(m, at)| m == message && now.duration_since(*at) < self.interval);
        if repeat_within_interval {
            return false;
        }
        self.last = Some((message.to_string(), now));
        true
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    fn is_available(&self) -> bool {
        let state = self.state();
        state.enabled && state.connected
    }

    fn status(&self) -> ConnectionStatus {
        self.state().status()
    }

    async fn connect(&self) {
        if !self.settings.enabled {
            return;
        }
        if !self.try_connect().await {
            self.wake.notify_one();
        }
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::Relaxed);
        // Unblock the worker so it observes `closed` and exits.
        self.wake.notify_one();
        // Dropping the multiplexed connection closes it; close-time errors
        // have nowhere to surface and are intentionally swallowed.
        *self.conn.write().await = None;
        self.state().reset();
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.get::<_, Option<String>>(key).await).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        match expiry {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.finish(conn.set_ex::<_, _, ()>(key, value, secs).await)
                    .await
            }
            None => self.finish(conn.set::<_, _, ()>(key, value).await).await,
        }
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.del::<_, ()>(key).await).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.exists::<_, bool>(key).await).await
    }

    async fn pttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection().await?;
        let ms = self.finish(conn.pttl::<_, i64>(key).await).await?;
        // -2 = missing key, -1 = no expiry.
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<(i64, Duration), StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let count = self.finish(conn.incr::<_, _, i64>(key, 1).await).await?;
        if count == 1 {
            // First request of the window carries the expiry.
            self.finish(conn.pexpire::<_, ()>(key, window_ms).await)
                .await?;
            return Ok((count, window));
        }

        let ttl_ms = self.finish(conn.pttl::<_, i64>(key).await).await?;
        match u64::try_from(ttl_ms) {
            Ok(ms) => Ok((count, Duration::from_millis(ms))),
            Err(_) => {
                // The key lost its expiry (e.g. a crash between INCR and
                // PEXPIRE); reattach it rather than counting forever.
                self.finish(conn.pexpire::<_, ()>(key, window_ms).await)
                    .await?;
                Ok((count, window))
            }
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.hget::<_, _, Option<String>>(key, field).await)
            .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.hset::<_, _, _, ()>(key, field, value).await)
            .await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.hdel::<_, _, ()>(key, field).await).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection().await?;
        self.finish(conn.hgetall::<_, HashMap<String, String>>(key).await)
            .await
    }
}
