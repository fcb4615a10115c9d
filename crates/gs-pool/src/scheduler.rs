//! The batch-scheduler seam and the shared pool state it feeds.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use gs_types::{Dataset, DatasetKey, GsResult, ResourceSpec};

/// Identifier of a single worker process in the pool.
pub type WorkerId = Uuid;

/// Scheduler-side identifier of one scalable worker job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scalable worker job description handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub spec: ResourceSpec,
    /// Initial worker target (processes, not allocations).
    pub workers: usize,
}

/// Membership change in the worker pool.
///
/// Consumers subscribe via [`PoolState::subscribe`]; the pool is elastic, so
/// workers may join late or leave mid-run and the execution backend reacts
/// to these events rather than polling.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    WorkerJoined { worker: WorkerId },
    WorkerLeft { worker: WorkerId, reason: String },
}

/// One task shipped to a worker.
///
/// The payload is an opaque serialized closure argument; the training data
/// is referenced by key, never inlined per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    /// Submission-order index; results are reassembled by this.
    pub seq: usize,
    pub payload: serde_json::Value,
    pub data: Option<DatasetKey>,
}

/// Worker-side outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub seq: usize,
    pub worker: WorkerId,
    pub outcome: Result<serde_json::Value, String>,
}

/// Requests a worker process accepts over its queue.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Store broadcast data under a key for later tasks to reference.
    Upload {
        key: DatasetKey,
        data: Arc<Dataset>,
    },
    /// Execute one task and reply on the supplied channel.
    Run {
        task: TaskEnvelope,
        reply: mpsc::Sender<TaskCompletion>,
    },
}

/// The worker-side execution seam: turns a task payload (plus optional
/// broadcast data) into a result value.
pub trait TaskRunner: Send + Sync {
    fn run(&self, payload: &serde_json::Value, data: Option<&Dataset>) -> GsResult<serde_json::Value>;
}

/// Live connection to a single worker.
#[derive(Debug, Clone)]
pub struct WorkerChannel {
    pub id: WorkerId,
    pub requests: mpsc::Sender<WorkerRequest>,
}

/// Shared, mutable view of the pool: the worker registry plus the
/// membership event stream.
///
/// Scheduler implementations register workers as they come up; everything
/// else only reads.
#[derive(Debug)]
pub struct PoolState {
    workers: DashMap<WorkerId, WorkerChannel>,
    events: broadcast::Sender<PoolEvent>,
}

impl PoolState {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            workers: DashMap::new(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id).collect()
    }

    pub fn request_sender(&self, worker: WorkerId) -> Option<mpsc::Sender<WorkerRequest>> {
        self.workers.get(&worker).map(|w| w.requests.clone())
    }

    /// Called by scheduler implementations once a worker is reachable.
    pub fn register_worker(&self, channel: WorkerChannel) {
        let worker = channel.id;
        self.workers.insert(worker, channel);
        tracing::debug!(%worker, "worker joined pool");
        let _ = self.events.send(PoolEvent::WorkerJoined { worker });
    }

    /// Called when a worker becomes unreachable (eviction, crash, release).
    pub fn deregister_worker(&self, worker: WorkerId, reason: &str) {
        if self.workers.remove(&worker).is_some() {
            tracing::debug!(%worker, reason, "worker left pool");
            let _ = self.events.send(PoolEvent::WorkerLeft {
                worker,
                reason: reason.to_string(),
            });
        }
    }
}

/// Interface to the batch-scheduling system.
///
/// Implementations submit a scalable worker job, adjust its worker target,
/// and cancel it. The actual worker count converges asynchronously as the
/// scheduler admits or evicts allocations; reachable workers appear in the
/// [`PoolState`] passed at submission time.
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Submit the job description. Returns as soon as the scheduler accepts
    /// it; rejection surfaces immediately as an error, with no retry.
    async fn submit(&self, request: &AllocationRequest, state: Arc<PoolState>) -> GsResult<JobId>;

    /// Adjust the worker target for a submitted job.
    async fn set_worker_target(&self, job: &JobId, workers: usize) -> GsResult<()>;

    /// Cancel the job and tear down its allocations.
    async fn cancel(&self, job: &JobId) -> GsResult<()>;
}
