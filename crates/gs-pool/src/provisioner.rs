//! Pool provisioning: submit, scale, connect, release.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use gs_types::{Dataset, DatasetKey, GsResult, PoolError, ResourceSpec};

use crate::scheduler::{
    AllocationRequest, BatchScheduler, JobId, PoolEvent, PoolState, WorkerId, WorkerRequest,
};

/// Provisions worker pools from a batch scheduler.
pub struct Provisioner {
    scheduler: Arc<dyn BatchScheduler>,
}

impl Provisioner {
    pub fn new(scheduler: Arc<dyn BatchScheduler>) -> Self {
        Self { scheduler }
    }

    /// Validate the spec and submit the worker job.
    ///
    /// Returns as soon as the scheduler accepts the submission — workers
    /// become reachable asynchronously; use [`PoolHandle::connect`] to wait
    /// for the first one. Scheduler rejection surfaces immediately and is
    /// never retried here.
    pub async fn provision(&self, spec: ResourceSpec) -> GsResult<PoolHandle> {
        spec.validate()?;

        let state = PoolState::new();
        let workers = spec.initial_workers();
        let request = AllocationRequest {
            spec: spec.clone(),
            workers,
        };

        let job = self
            .scheduler
            .submit(&request, Arc::clone(&state))
            .await?;
        info!(%job, workers, "worker pool provisioned");

        Ok(PoolHandle {
            job,
            spec,
            scheduler: Arc::clone(&self.scheduler),
            state,
            target: AtomicUsize::new(workers),
            released: AtomicBool::new(false),
        })
    }
}

/// Handle to a provisioned (possibly not yet reachable) worker pool.
pub struct PoolHandle {
    job: JobId,
    spec: ResourceSpec,
    scheduler: Arc<dyn BatchScheduler>,
    state: Arc<PoolState>,
    target: AtomicUsize,
    released: AtomicBool,
}

impl PoolHandle {
    pub fn job(&self) -> &JobId {
        &self.job
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn state(&self) -> &Arc<PoolState> {
        &self.state
    }

    /// Current worker target (the actual count converges asynchronously).
    pub fn target_workers(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    /// Adjust the worker target.
    ///
    /// Idempotent: re-issuing the current target makes no scheduler call.
    pub async fn scale(&self, workers: usize) -> GsResult<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PoolError::Released.into());
        }
        if self.target.load(Ordering::SeqCst) == workers {
            debug!(job = %self.job, workers, "scale target unchanged; skipping scheduler call");
            return Ok(());
        }

        self.scheduler.set_worker_target(&self.job, workers).await?;
        self.target.store(workers, Ordering::SeqCst);
        info!(job = %self.job, workers, "worker target updated");
        Ok(())
    }

    /// Block until at least one worker is reachable, then return an
    /// execution context over the pool.
    pub async fn connect(&self, timeout: Duration) -> GsResult<ExecutionContext> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PoolError::Released.into());
        }

        // Subscribe before checking the count so a join between the check
        // and the wait cannot be missed.
        let mut events = self.state.subscribe();
        if self.state.worker_count() == 0 {
            self.wait_for_first_worker(&mut events, timeout).await?;
        }

        debug!(job = %self.job, workers = self.state.worker_count(), "pool connected");
        Ok(ExecutionContext::new(Arc::clone(&self.state)))
    }

    async fn wait_for_first_worker(
        &self,
        events: &mut broadcast::Receiver<PoolEvent>,
        timeout: Duration,
    ) -> GsResult<()> {
        let unavailable = || PoolError::Unavailable {
            waited_secs: timeout.as_secs(),
        };

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(PoolEvent::WorkerJoined { .. }) => return Ok(()),
                    Ok(PoolEvent::WorkerLeft { .. }) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.state.worker_count() > 0 {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(unavailable().into());
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(unavailable().into()),
        }
    }

    /// Scale to zero and cancel the job. Idempotent; used on every
    /// unrecoverable error path so allocations never leak.
    pub async fn release(&self) -> GsResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.scheduler.set_worker_target(&self.job, 0).await?;
        self.scheduler.cancel(&self.job).await?;
        self.target.store(0, Ordering::SeqCst);
        info!(job = %self.job, "worker pool released");
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Read view of a connected pool, plus broadcast bookkeeping.
///
/// Broadcast data is uploaded once per worker and referenced by key in
/// every task; recorded entries are replayed to workers that join late.
pub struct ExecutionContext {
    state: Arc<PoolState>,
    broadcasts: DashMap<DatasetKey, Arc<Dataset>>,
}

impl ExecutionContext {
    pub fn new(state: Arc<PoolState>) -> Self {
        Self {
            state,
            broadcasts: DashMap::new(),
        }
    }

    pub fn state(&self) -> &Arc<PoolState> {
        &self.state
    }

    /// Upload a dataset to every current worker and record it for late
    /// joiners. Returns the key tasks use to reference it.
    pub async fn broadcast(&self, data: Arc<Dataset>) -> DatasetKey {
        let key = DatasetKey::generate();
        self.broadcasts.insert(key, Arc::clone(&data));

        for worker in self.state.worker_ids() {
            self.upload_to(worker, key, Arc::clone(&data)).await;
        }
        debug!(%key, rows = data.len(), "dataset broadcast to pool");
        key
    }

    /// Replay all recorded broadcasts to one (late-joining) worker.
    pub async fn sync_worker(&self, worker: WorkerId) {
        let entries: Vec<(DatasetKey, Arc<Dataset>)> = self
            .broadcasts
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        for (key, data) in entries {
            self.upload_to(worker, key, data).await;
        }
    }

    async fn upload_to(&self, worker: WorkerId, key: DatasetKey, data: Arc<Dataset>) {
        let Some(sender) = self.state.request_sender(worker) else {
            return;
        };
        if sender
            .send(WorkerRequest::Upload { key, data })
            .await
            .is_err()
        {
            warn!(%worker, "upload failed; worker queue closed");
        }
    }
}
