//! `gatehouse run` — start the gateway.
//!
//! Builds the component settings from CLI flags, kicks off the shared store
//! connection (the server starts regardless of the store's state — a down
//! store only means degraded mode), and serves the Axum router with
//! graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::BreakerSettings;
use crate::cli::RunArgs;
use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::limit::RatePolicy;
use crate::logging;
use crate::server::{self, AppState};
use crate::store::{RedisStore, SharedStore, StoreSettings};

pub async fn execute(args: RunArgs) -> Result<(), GatewayError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let settings = settings_from_args(&args);

    let store = RedisStore::new(StoreSettings {
        url: args.redis_url.clone(),
        enabled: !args.without_redis,
        max_reconnect_attempts: args.store_max_reconnects,
        ..StoreSettings::default()
    });

    // Initial connection attempt. Failure is not fatal: the reconnect worker
    // keeps trying and every component has a degraded path.
    store.connect().await;
    if args.without_redis {
        tracing::warn!("running without the shared store: per-instance rate limits, cache-only registry");
    } else if !store.is_available() {
        tracing::warn!("shared store not reachable yet, starting in degraded mode");
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&store) as Arc<dyn SharedStore>,
        settings,
        &args.namespace,
    ));

    let router = server::build_router(Arc::clone(&state), args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        namespace = %args.namespace,
        store_enabled = !args.without_redis,
        "gatehouse started"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(server::shutdown_signal())
    .await?;

    // Best-effort close; close-time errors are swallowed by the store.
    state.store.disconnect().await;

    tracing::info!("gatehouse stopped");
    Ok(())
}

fn settings_from_args(args: &RunArgs) -> GatewaySettings {
    GatewaySettings {
        registry_fresh_for: Duration::from_millis(args.cache_ttl),
        rate_general: RatePolicy {
            limit: args.rate_limit,
            window: Duration::from_secs(args.rate_window),
        },
        rate_auth: RatePolicy {
            limit: args.auth_rate_limit,
            window: Duration::from_secs(args.rate_window),
        },
        breaker: BreakerSettings {
            failure_rate_threshold: f64::from(args.breaker_threshold) / 100.0,
            window: Duration::from_secs(args.breaker_window),
            min_calls: args.breaker_min_calls,
            reset_timeout: Duration::from_secs(args.breaker_reset),
            half_open_max_probes: args.breaker_probes,
        },
        dispatch_timeout: Duration::from_millis(args.timeout),
    }
}
