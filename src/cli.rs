//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, health), and their associated argument structs. Every
//! flag has an environment variable equivalent for container deployments.

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "gatehouse",
    version,
    about = "Resilient API gateway with dynamic service discovery",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        gatehouse run                        Start against redis://127.0.0.1:6379\n  \
        gatehouse run --without-redis        Start degraded (local-only limits)\n  \
        gatehouse health                     Probe a running instance\n\n  \
        Docs: https://github.com/gatehouse-proxy/gatehouse"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway
    Run(Box<RunArgs>),

    /// Check health of a running instance
    Health(HealthArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        gatehouse run                                      Defaults, local Redis\n  \
        gatehouse run -p 8080 --pretty                     Local dev mode\n  \
        gatehouse run --redis-url redis://cache:6379        Shared cache host\n  \
        gatehouse run --without-redis                      No shared store (degraded)")]
pub struct RunArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Key namespace in the shared store
    #[arg(short, long, env = "GATEHOUSE_NAMESPACE", default_value = "default")]
    pub namespace: String,

    // -- Shared Store --
    /// Redis connection URL
    #[arg(
        long,
        env = "REDIS_URL",
        default_value = "redis://127.0.0.1:6379",
        help_heading = "Shared Store"
    )]
    pub redis_url: String,

    /// Run without the shared store (per-instance limits, cache-only registry)
    #[arg(long, env = "WITHOUT_REDIS", help_heading = "Shared Store")]
    pub without_redis: bool,

    /// Consecutive reconnect attempts before pausing until next use
    #[arg(
        long,
        env = "REDIS_MAX_RECONNECTS",
        default_value_t = 10,
        help_heading = "Shared Store"
    )]
    pub store_max_reconnects: u32,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Rate Limiting --
    /// Requests allowed per identity per window (general traffic)
    #[arg(
        long,
        env = "RATE_LIMIT",
        default_value_t = 100,
        help_heading = "Rate Limiting"
    )]
    pub rate_limit: u64,

    /// Requests allowed per identity per window (auth endpoints)
    #[arg(
        long,
        env = "AUTH_RATE_LIMIT",
        default_value_t = 5,
        help_heading = "Rate Limiting"
    )]
    pub auth_rate_limit: u64,

    /// Rate limit window in seconds
    #[arg(
        long,
        env = "RATE_WINDOW_SECS",
        default_value_t = 900,
        help_heading = "Rate Limiting"
    )]
    pub rate_window: u64,

    // -- Circuit Breaker --
    /// Failure percentage at which a service's breaker opens
    #[arg(
        long,
        env = "BREAKER_THRESHOLD_PCT",
        default_value_t = 50,
        help_heading = "Circuit Breaker"
    )]
    pub breaker_threshold: u8,

    /// Trailing window for the failure rate, in seconds
    #[arg(
        long,
        env = "BREAKER_WINDOW_SECS",
        default_value_t = 30,
        help_heading = "Circuit Breaker"
    )]
    pub breaker_window: u64,

    /// Minimum calls in the window before the breaker can open
    #[arg(
        long,
        env = "BREAKER_MIN_CALLS",
        default_value_t = 5,
        help_heading = "Circuit Breaker"
    )]
    pub breaker_min_calls: usize,

    /// Seconds an open breaker waits before probing
    #[arg(
        long,
        env = "BREAKER_RESET_SECS",
        default_value_t = 30,
        help_heading = "Circuit Breaker"
    )]
    pub breaker_reset: u64,

    /// Probe requests admitted while half-open
    #[arg(
        long,
        env = "BREAKER_PROBES",
        default_value_t = 3,
        help_heading = "Circuit Breaker"
    )]
    pub breaker_probes: usize,

    // -- Tuning --
    /// Outbound dispatch timeout in milliseconds
    #[arg(
        long,
        env = "REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        help_heading = "Tuning"
    )]
    pub timeout: u64,

    /// Max request body size in bytes
    #[arg(
        long,
        env = "MAX_BODY_SIZE",
        default_value_t = 1_048_576,
        help_heading = "Tuning"
    )]
    pub max_body: usize,

    /// Registry cache freshness window in milliseconds
    #[arg(
        long,
        env = "REGISTRY_CACHE_TTL_MS",
        default_value_t = 10_000,
        help_heading = "Tuning"
    )]
    pub cache_ttl: u64,
}

#[derive(Args)]
pub struct HealthArgs {
    /// URL of the running instance
    #[arg(default_value = "http://localhost:3000")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}
