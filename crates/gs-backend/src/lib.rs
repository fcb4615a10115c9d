//! # gs-backend
//!
//! Execution backends for fan-out task batches.
//!
//! [`LocalBackend`] runs a batch on the local thread pool; [`PoolBackend`]
//! ships each task to a remote worker pool and reassembles results in
//! submission order, retrying tasks whose worker disappeared mid-run.
//! [`BackendSwitch`] is the explicit, scope-activated stand-in for an
//! ambient "current backend": activation returns an RAII guard, so the
//! previous backend is restored on every exit path.

mod local;
mod pool;
mod switch;

pub use local::LocalBackend;
pub use pool::{PoolBackend, RetryPolicy};
pub use switch::{ActivationGuard, Backend, BackendSwitch};
