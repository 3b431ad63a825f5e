//! Gatehouse is a resilient API gateway.
//!
//! It receives incoming HTTP requests, rate limits them, resolves the target
//! backend through a shared-store-backed service registry, and forwards each
//! request behind a per-service circuit breaker. The shared store (Redis) may
//! drop out at any time; every component degrades gracefully and recovers
//! without a restart.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, health).
//! - [`config`] -- Runtime settings for the registry, limiter, breaker, and
//!   dispatcher, assembled from CLI flags.
//! - [`error`] -- Unified error types using `thiserror`, plus the
//!   machine-parseable error bodies returned to clients.
//! - [`store`] -- The shared-state client: a single Redis connection with
//!   automatic reconnection, exposed behind the
//!   [`SharedStore`](store::SharedStore) trait.
//! - [`registry`] -- Cache-aside service discovery mapping logical names to
//!   base URLs.
//! - [`limit`] -- Fixed-window rate limiting, distributed when the store is
//!   up, in-process when it is not.
//! - [`breaker`] -- Per-service circuit breakers guarding outbound dispatch.
//! - [`proxy`] -- The `/api/{service}/...` dispatch handler and header
//!   plumbing.
//! - [`middleware`] -- Tower/axum middleware layers (rate limiting).
//! - [`sessions`] -- Token and session records, another tenant of the shared
//!   store.
//! - [`admin`] -- Service CRUD and runtime stats endpoints.
//! - [`health`] -- `GET /health` endpoint handler returning runtime
//!   diagnostics.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print
//!   output.
//! - [`server`] -- Axum server setup, shared application state, HTTP client,
//!   and graceful shutdown.

// Binary crate — public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod admin;
pub mod breaker;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod limit;
pub mod logging;
pub mod middleware;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod sessions;
pub mod store;
