//! Runtime settings for the gateway's components.
//!
//! [`GatewaySettings`] groups the per-component knobs that `cmd::run`
//! assembles from CLI flags and that tests construct directly. Defaults
//! mirror the flag defaults in [`cli`](crate::cli).

use std::time::Duration;

use crate::breaker::BreakerSettings;
use crate::limit::RatePolicy;

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// How long a registry cache entry is trusted without a store read.
    pub registry_fresh_for: Duration,

    /// Policy for general traffic.
    pub rate_general: RatePolicy,

    /// Stricter policy for authentication-initiating endpoints.
    pub rate_auth: RatePolicy,

    pub breaker: BreakerSettings,

    /// Upper bound on one outbound dispatch attempt.
    pub dispatch_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            registry_fresh_for: Duration::from_secs(10),
            rate_general: RatePolicy::general(),
            rate_auth: RatePolicy::auth(),
            breaker: BreakerSettings::default(),
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}
