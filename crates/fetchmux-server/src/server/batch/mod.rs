//! Per-request fan-out and fan-in.
//!
//! A client batch becomes one [`Job`](fetchmux_core::Job) per URL. The jobs are
//! fed to the worker pool from a spawned task ([`coordinator`]) while the
//! request handler drains their outcomes ([`collector`]).
//!
//! - [`coordinator`] - Builds jobs and submits them to the dispatcher.
//! - [`collector`] - Waits for every outcome, failing fast on the first error.

pub mod collector;
pub mod coordinator;

use std::collections::BTreeMap;

/// Aggregated batch response: batch position -> `{ url: body }`.
///
/// Serializes as a JSON object whose keys are the decimal positions.
pub type BatchResponse = BTreeMap<usize, BTreeMap<String, String>>;
