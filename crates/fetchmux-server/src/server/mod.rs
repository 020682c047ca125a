//! Process-side pieces of the multiplexer.
//!
//! - [`config`] - CLI/env configuration.
//! - [`pool`] - Worker pool and job routing.
//! - [`admission`] - Non-blocking request admission gate.
//! - [`batch`] - Per-request fan-out/fan-in.
//! - [`service`] - The `POST /` handler.
//! - [`fetch`] - `reqwest`-backed fetch operation.
//! - [`router`] - axum application assembly.
//! - [`serve`] - Connection accept loop with read timeouts and graceful drain.
//! - [`telemetry`] - Logging and optional metrics.

pub mod admission;
pub mod batch;
pub mod config;
pub mod fetch;
pub mod pool;
pub mod router;
pub mod serve;
pub mod service;
pub mod telemetry;
