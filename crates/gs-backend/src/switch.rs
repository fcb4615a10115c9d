//! Backend selection with a scope-bound activation guard.
//!
//! The "currently active backend" is deliberately not global state: a
//! [`BackendSwitch`] is created by the caller and threaded through the
//! driver explicitly. Activating a backend returns a guard that restores
//! the previous one when dropped, so the swap cannot outlive its scope on
//! any exit path — early return, `?`, or panic.

use parking_lot::RwLock;
use std::sync::Arc;

use gs_pool::TaskEnvelope;
use gs_types::{internal_error, Dataset, DatasetKey, GsResult};

use crate::local::LocalBackend;
use crate::pool::PoolBackend;

/// An execution backend for fan-out task batches.
pub enum Backend {
    Local(LocalBackend),
    Pool(PoolBackend),
}

impl Backend {
    pub fn is_local(&self) -> bool {
        matches!(self, Backend::Local(_))
    }

    /// Make a dataset available to tasks, returning its reference key.
    pub async fn broadcast(&self, data: Arc<Dataset>) -> DatasetKey {
        match self {
            Backend::Local(local) => local.register(data),
            Backend::Pool(pool) => pool.broadcast(data).await,
        }
    }

    /// Execute a batch; results are returned in submission order.
    pub async fn map(&self, tasks: Vec<TaskEnvelope>) -> GsResult<Vec<serde_json::Value>> {
        match self {
            Backend::Local(local) => {
                let local = local.clone();
                tokio::task::spawn_blocking(move || local.run(&tasks))
                    .await
                    .map_err(|err| internal_error!("local map panicked: {err}"))?
            }
            Backend::Pool(pool) => pool.map(tasks).await,
        }
    }
}

/// Holds the currently active [`Backend`].
pub struct BackendSwitch {
    active: RwLock<Arc<Backend>>,
}

impl BackendSwitch {
    /// A switch whose default (and fallback) backend is `default`.
    pub fn new(default: Arc<Backend>) -> Self {
        Self {
            active: RwLock::new(default),
        }
    }

    /// The backend computations should currently use.
    pub fn current(&self) -> Arc<Backend> {
        Arc::clone(&self.active.read())
    }

    /// Swap `backend` in for the duration of the returned guard's lifetime.
    ///
    /// The previous backend is restored when the guard drops, whatever the
    /// exit path.
    #[must_use = "the backend is deactivated as soon as the guard is dropped"]
    pub fn activate(&self, backend: Arc<Backend>) -> ActivationGuard<'_> {
        let previous = std::mem::replace(&mut *self.active.write(), backend);
        ActivationGuard {
            switch: self,
            previous: Some(previous),
        }
    }
}

/// Scope guard returned by [`BackendSwitch::activate`].
pub struct ActivationGuard<'a> {
    switch: &'a BackendSwitch,
    previous: Option<Arc<Backend>>,
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.switch.active.write() = previous;
        }
    }
}
