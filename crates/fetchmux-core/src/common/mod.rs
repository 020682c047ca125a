//! Shared job and error definitions used by the `fetchmux` server.
//!
//! - [`error`] - Service error type and its HTTP mapping.
//! - [`types`] - [`Job`](types::Job), [`JobOutput`](types::JobOutput) and the
//!   [`Fetch`](types::Fetch) trait.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ErrorSink, Fetch, Job, JobOutput, ResultSink};
