//! Fixed-window request rate limiting per client identity.
//!
//! Two interchangeable strategies share the same window semantics. When the
//! shared store is reachable, counters live there (atomic increment with
//! expiry), so limits hold across every gateway instance. When it is not,
//! counting falls back to an in-process map — per-instance limits only, an
//! explicitly accepted degradation — and reverts on its own once the store
//! comes back. Callers see the same [`RateDecision`] either way; a rejected
//! request is always distinguishable, never silently dropped.
//!
//! Authentication-initiating endpoints get their own, stricter policy:
//! they are a higher-value target for abuse than general traffic.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
// tokio's Instant so the window clock can be paused and advanced in tests.
use tokio::time::Instant;

use crate::store::SharedStore;

#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub limit: u64,
    pub window: Duration,
}

impl RatePolicy {
    /// General traffic: 100 requests per 15 minutes.
    #[must_use]
    pub const fn general() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(15 * 60),
        }
    }

    /// Authentication endpoints: 5 requests per 15 minutes.
    #[must_use]
    pub const fn auth() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

#[derive(Debug)]
struct WindowCounter {
    count: u64,
    window_started: Instant,
    window: Duration,
}

pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    local: DashMap<String, WindowCounter>,
    prefix: String,
    fallback_warned: std::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, namespace: &str) -> Self {
        Self {
            store,
            local: DashMap::new(),
            prefix: format!("gatehouse:{namespace}:ratelimit"),
            fallback_warned: std::sync::Mutex::new(None),
        }
    }

    /// Count one request from `identity` under `scope` and decide whether it
    /// is allowed. Never fails: a store outage silently switches to the
    /// in-process strategy for this call.
    pub async fn check(&self, scope: &str, identity: &str, policy: RatePolicy) -> RateDecision {
        if self.store.is_available() {
            let key = format!("{}:{scope}:{identity}", self.prefix);
            match self.store.incr_with_expiry(&key, policy.window).await {
                Ok((count, reset_after)) => {
                    return decision(count.max(0).unsigned_abs(), policy, reset_after);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "distributed rate limit check failed");
                }
            }
        }

        self.note_fallback();
        self.check_local(scope, identity, policy)
    }

    fn check_local(&self, scope: &str, identity: &str, policy: RatePolicy) -> RateDecision {
        let key = format!("{scope}:{identity}");
        let now = Instant::now();

        let mut entry = self
            .local
            .entry(key)
            .or_insert_with(|| WindowCounter {
                count: 0,
                window_started: now,
                window: policy.window,
            });

        // Entries expire on access: a stale window is simply restarted.
        if now.duration_since(entry.window_started) >= policy.window {
            entry.count = 0;
            entry.window_started = now;
            entry.window = policy.window;
        }

        entry.count += 1;
        let reset_after = policy
            .window
            .saturating_sub(now.duration_since(entry.window_started));
        decision(entry.count, policy, reset_after)
    }

    /// Bookkeeping on the fallback path, throttled to once a minute: a
    /// warning for observability, plus a prune of the local map so dead
    /// identities do not accumulate (no background sweep exists).
    fn note_fallback(&self) {
        const INTERVAL: Duration = Duration::from_secs(60);
        let due = {
            let mut warned = self
                .fallback_warned
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let due = warned.map_or(true, |at| at.elapsed() >= INTERVAL);
            if due {
                *warned = Some(Instant::now());
            }
            due
        };
        if due {
            tracing::warn!("shared store unavailable, using in-process rate limiting");
            self.prune_local();
        }
    }

    /// Drop in-process windows that have outlived their own expiry.
    fn prune_local(&self) {
        let now = Instant::now();
        self.local
            .retain(|_, counter| now.duration_since(counter.window_started) < counter.window);
    }
}

fn decision(count: u64, policy: RatePolicy, reset_after: Duration) -> RateDecision {
    RateDecision {
        allowed: count <= policy.limit,
        limit: policy.limit,
        remaining: policy.limit.saturating_sub(count),
        reset_after,
    }
}
