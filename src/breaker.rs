//! Per-service circuit breakers guarding outbound dispatch.
//!
//! Each backend gets one [`CircuitBreaker`] for the process lifetime,
//! created on first dispatch and held in a [`BreakerRegistry`]. The breaker
//! tracks request outcomes over a trailing time window and moves through
//! three states:
//!
//! - **closed**: requests pass; the windowed failure rate is updated per
//!   outcome and the breaker opens when it reaches the threshold (with a
//!   minimum sample count, so one early failure cannot trip it).
//! - **open**: requests are rejected without a network attempt until the
//!   reset timeout elapses.
//! - **half-open**: a bounded number of probe requests pass; one success
//!   closes the breaker and clears the statistic, one failure re-opens it
//!   and restarts the timeout.
//!
//! The reset timeout is fixed, not exponential — unlike the store client's
//! backoff, a backend that keeps failing its probe gains nothing from longer
//! waits, only from fewer probes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Failure fraction in `[0, 1]` at which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Trailing window the failure rate is computed over.
    pub window: Duration,
    /// Minimum outcomes inside the window before the rate is meaningful.
    pub min_calls: usize,
    /// How long the breaker stays open before probing.
    pub reset_timeout: Duration,
    /// Concurrent probes admitted while half-open.
    pub half_open_max_probes: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            window: Duration::from_secs(30),
            min_calls: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probes_in_flight: usize,
}

pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &str, settings: BreakerSettings) -> Self {
        Self {
            name: name.to_string(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                probes_in_flight: 0,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask permission to attempt a request. An open breaker whose reset
    /// timeout has elapsed transitions to half-open here and admits the
    /// caller as a probe.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.settings.reset_timeout);
                if !expired {
                    return false;
                }
                inner.state = BreakerState::HalfOpen;
                inner.probes_in_flight = 1;
                tracing::info!(service = %self.name, "circuit breaker half-open, probing");
                true
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight >= self.settings.half_open_max_probes {
                    return false;
                }
                inner.probes_in_flight += 1;
                true
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner();
        match inner.state {
            BreakerState::Closed => {
                self.push_outcome(&mut inner, true);
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.outcomes.clear();
                inner.opened_at = None;
                inner.probes_in_flight = 0;
                tracing::info!(service = %self.name, "circuit breaker closed");
            }
            // A late success from a request that was in flight when the
            // breaker opened; the open verdict stands.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner();
        match inner.state {
            BreakerState::Closed => {
                self.push_outcome(&mut inner, false);
                let (failures, total) = self.window_counts(&mut inner);
                if total >= self.settings.min_calls {
                    #[allow(clippy::cast_precision_loss)]
                    let rate = failures as f64 / total as f64;
                    if rate >= self.settings.failure_rate_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(Instant::now());
                        inner.outcomes.clear();
                        tracing::warn!(
                            service = %self.name,
                            failure_rate = rate,
                            window_calls = total,
                            "circuit breaker opened"
                        );
                    }
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probes_in_flight = 0;
                tracing::warn!(service = %self.name, "probe failed, circuit breaker re-opened");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state, with the open -> half-open clock taken into account.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let inner = self.inner();
        if inner.state == BreakerState::Open {
            let expired = inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.settings.reset_timeout);
            if expired {
                return BreakerState::HalfOpen;
            }
        }
        inner.state
    }

    fn push_outcome(&self, inner: &mut Inner, success: bool) {
        inner.outcomes.push_back((Instant::now(), success));
        // Bound memory under sustained traffic; the trailing window rarely
        // needs more samples than this to be statistically meaningful.
        while inner.outcomes.len() > 512 {
            inner.outcomes.pop_front();
        }
    }

    fn window_counts(&self, inner: &mut Inner) -> (usize, usize) {
        if let Some(cutoff) = Instant::now().checked_sub(self.settings.window) {
            while inner
                .outcomes
                .front()
                .is_some_and(|(at, _)| *at < cutoff)
            {
                inner.outcomes.pop_front();
            }
        }
        let total = inner.outcomes.len();
        let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
        (failures, total)
    }
}

/// Process-wide map of service name -> breaker.
///
/// A breaker must be created at most once per service name and reused across
/// requests; `for_service` goes through the map's entry API so concurrent
/// first dispatches cannot race two instances into existence.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    #[must_use]
    pub fn for_service(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.settings)))
            .clone()
    }

    /// Whether a breaker exists for `name`, without creating one.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    /// Snapshot of every breaker's state, for the admin surface.
    #[must_use]
    pub fn states(&self) -> std::collections::HashMap<String, BreakerState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }
}
