//! Shared-state client: the single connection to the external key/value/hash
//! store that every other component depends on.
//!
//! Defines the [`SharedStore`] trait for pluggable store backends, the
//! [`ConnectionState`] tracked by the production client, and the
//! [`StoreError`] taxonomy dependents see. The store may be unreachable at
//! any moment; operations fail explicitly and quickly, never hang, and
//! dependents choose their own fallback path via [`SharedStore::is_available`].

pub mod redis_store;

pub use redis_store::{RedisStore, StoreSettings};

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("shared store is disabled")]
    Disabled,

    #[error("shared store is not connected")]
    NotConnected,

    #[error("store command failed: {0}")]
    Command(String),
}

/// Connection lifecycle state of the shared store client.
///
/// Single instance per client, mutated only by the client's own
/// connect/error/close paths. Invariant: `connected` and `connecting` are
/// never both true — every transition below re-establishes it.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub enabled: bool,
    pub connected: bool,
    pub connecting: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<SystemTime>,
    pub last_connected_at: Option<SystemTime>,
    pub reconnect_attempts: u32,
}

impl ConnectionState {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            connected: false,
            connecting: false,
            last_error: None,
            last_error_at: None,
            last_connected_at: None,
            reconnect_attempts: 0,
        }
    }

    /// Mark a connection attempt as started. Returns `false` (and changes
    /// nothing) if disabled, already connected, or already connecting.
    pub fn begin_connect(&mut self) -> bool {
        if !self.enabled || self.connected || self.connecting {
            return false;
        }
        self.connecting = true;
        true
    }

    pub fn connect_succeeded(&mut self) {
        self.connecting = false;
        self.connected = true;
        self.reconnect_attempts = 0;
        self.last_connected_at = Some(SystemTime::now());
    }

    /// Record a failed connect attempt or a lost connection.
    pub fn record_failure(&mut self, message: &str) {
        self.connecting = false;
        self.connected = false;
        self.last_error = Some(message.to_string());
        self.last_error_at = Some(SystemTime::now());
    }

    pub fn reset(&mut self) {
        self.connected = false;
        self.connecting = false;
        self.reconnect_attempts = 0;
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            enabled: self.enabled,
            connected: self.connected,
            connecting: self.connecting,
            last_error: self.last_error.clone(),
            last_error_at_ms: self.last_error_at.and_then(unix_ms),
            last_connected_at_ms: self.last_connected_at.and_then(unix_ms),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

/// Serializable snapshot of [`ConnectionState`] for the health and admin
/// surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub enabled: bool,
    pub connected: bool,
    pub connecting: bool,
    pub last_error: Option<String>,
    pub last_error_at_ms: Option<u64>,
    pub last_connected_at_ms: Option<u64>,
    pub reconnect_attempts: u32,
}

fn unix_ms(t: SystemTime) -> Option<u64> {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// async_trait is required here because SharedStore is used as
// Arc<dyn SharedStore> and native async fn in traits (Rust 1.75+) does not
// support dyn dispatch.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Non-throwing availability check dependents use to pick a code path.
    fn is_available(&self) -> bool;

    fn status(&self) -> ConnectionStatus;

    /// Idempotent: returns immediately if already connected or connecting.
    /// Failures are captured into the connection state, never returned.
    async fn connect(&self);

    /// Cancels pending reconnection, closes gracefully, resets state.
    async fn disconnect(&self);

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
    ) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining time-to-live of `key`, `None` when the key is missing or
    /// has no expiry.
    async fn pttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Atomically increment `key`, attaching `window` as its expiry on first
    /// increment. Returns the new count and the remaining window.
    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<(i64, Duration), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_and_connecting_never_both_true() {
        let mut state = ConnectionState::new(true);

        // Exercise every transition in a plausible event sequence and check
        // the invariant after each step.
        let steps: Vec<Box<dyn Fn(&mut ConnectionState)>> = vec![
            Box::new(|s| {
                s.begin_connect();
            }),
            Box::new(|s| s.record_failure("refused")),
            Box::new(|s| {
                s.begin_connect();
            }),
            Box::new(ConnectionState::connect_succeeded),
            Box::new(|s| {
                // connect() while connected is a no-op
                assert!(!s.begin_connect());
            }),
            Box::new(|s| s.record_failure("dropped")),
            Box::new(|s| {
                s.begin_connect();
            }),
            Box::new(ConnectionState::connect_succeeded),
            Box::new(ConnectionState::reset),
        ];

        for step in steps {
            step(&mut state);
            assert!(
                !(state.connected && state.connecting),
                "invariant violated: connected and connecting both true"
            );
        }
    }

    #[test]
    fn begin_connect_noop_when_disabled() {
        let mut state = ConnectionState::new(false);
        assert!(!state.begin_connect());
        assert!(!state.connecting);
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut state = ConnectionState::new(true);
        state.reconnect_attempts = 7;
        state.begin_connect();
        state.connect_succeeded();
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.last_connected_at.is_some());
    }

    #[test]
    fn failure_records_error_and_timestamp() {
        let mut state = ConnectionState::new(true);
        state.begin_connect();
        state.record_failure("connection refused");
        assert!(!state.connected);
        assert!(!state.connecting);
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
        assert!(state.last_error_at.is_some());
    }

    #[test]
    fn status_snapshot_round_trips() {
        let mut state = ConnectionState::new(true);
        state.begin_connect();
        state.connect_succeeded();
        let status = state.status();
        assert!(status.connected);
        assert!(!status.connecting);
        let json = serde_json::to_string(&status).unwrap();
        let parsed: ConnectionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.connected, status.connected);
        assert_eq!(parsed.last_connected_at_ms, status.last_connected_at_ms);
    }
}
