//! HTTP service implementation.
//!
//! This module contains the client-facing request handling: validation of the
//! URL batch, delegation to the worker pool, and rendering of the aggregated
//! response.
//!
//! ## Structure
//!
//! - [`handler`] - `POST /` entry point ([`MultiplexService`](handler::MultiplexService)).

pub mod handler;
