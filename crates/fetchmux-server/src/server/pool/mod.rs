//! Worker pool: the [`Dispatcher`](manager::Dispatcher) and its worker tasks.
//!
//! - [`manager`] - Pool handle, routing loop and shutdown.
//! - [`worker`] - Per-worker announce/execute loop.

pub mod manager;
pub mod worker;

pub use manager::Dispatcher;
