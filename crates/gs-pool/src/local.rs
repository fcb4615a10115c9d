//! In-process cluster: a [`BatchScheduler`] whose workers are tasks in the
//! current process.
//!
//! Used by demos and tests in place of a real batch system. Workers honour
//! the same lifecycle as remote ones: they join after an admission delay,
//! can be evicted mid-task, and a panicking task payload crashes the whole
//! worker without a reply — which is what the execution backend's retry
//! path is built around.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use gs_types::{Dataset, DatasetKey, GsResult, PoolError};

use crate::scheduler::{
    AllocationRequest, BatchScheduler, JobId, PoolState, TaskCompletion, TaskRunner, WorkerChannel,
    WorkerId, WorkerRequest,
};

struct WorkerSlot {
    id: WorkerId,
    kill: watch::Sender<bool>,
}

#[derive(Default)]
struct ClusterInner {
    job: Option<JobId>,
    state: Option<Arc<PoolState>>,
    workers: Vec<WorkerSlot>,
}

/// A single-job, in-process worker cluster.
pub struct InProcessCluster {
    runner: Arc<dyn TaskRunner>,
    admission_delay: Duration,
    inner: Mutex<ClusterInner>,
}

impl InProcessCluster {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            runner,
            admission_delay: Duration::from_millis(10),
            inner: Mutex::new(ClusterInner::default()),
        }
    }

    /// Delay between allocation and the worker becoming reachable,
    /// mimicking batch-queue admission latency.
    pub fn with_admission_delay(mut self, delay: Duration) -> Self {
        self.admission_delay = delay;
        self
    }

    /// Evict one worker immediately, even mid-task. Returns `false` if the
    /// worker is not (or no longer) managed by this cluster.
    pub fn kill_worker(&self, worker: WorkerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(position) = inner.workers.iter().position(|slot| slot.id == worker) else {
            return false;
        };
        let slot = inner.workers.remove(position);
        let _ = slot.kill.send(true);
        true
    }

    fn spawn_worker(&self, state: Arc<PoolState>) -> WorkerSlot {
        let id = Uuid::new_v4();
        let (request_tx, request_rx) = mpsc::channel(64);
        let (kill_tx, kill_rx) = watch::channel(false);

        tokio::spawn(worker_loop(
            id,
            state,
            Arc::clone(&self.runner),
            request_tx,
            request_rx,
            kill_rx,
            self.admission_delay,
        ));

        WorkerSlot { id, kill: kill_tx }
    }

    fn adjust_workers(&self, inner: &mut ClusterInner, workers: usize) -> GsResult<()> {
        let state = inner.state.clone().ok_or(PoolError::Released)?;

        while inner.workers.len() < workers {
            let slot = self.spawn_worker(Arc::clone(&state));
            inner.workers.push(slot);
        }
        while inner.workers.len() > workers {
            if let Some(slot) = inner.workers.pop() {
                let _ = slot.kill.send(true);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchScheduler for InProcessCluster {
    async fn submit(&self, request: &AllocationRequest, state: Arc<PoolState>) -> GsResult<JobId> {
        let mut inner = self.inner.lock();
        if inner.job.is_some() {
            return Err(PoolError::Scheduler {
                message: "in-process cluster already runs a job".to_string(),
            }
            .into());
        }

        let job = JobId::generate();
        inner.job = Some(job.clone());
        inner.state = Some(state);
        self.adjust_workers(&mut inner, request.workers)?;
        debug!(%job, workers = request.workers, "in-process job submitted");
        Ok(job)
    }

    async fn set_worker_target(&self, job: &JobId, workers: usize) -> GsResult<()> {
        let mut inner = self.inner.lock();
        if inner.job.as_ref() != Some(job) {
            return Err(PoolError::JobNotFound {
                job_id: job.to_string(),
            }
            .into());
        }
        self.adjust_workers(&mut inner, workers)
    }

    async fn cancel(&self, job: &JobId) -> GsResult<()> {
        let mut inner = self.inner.lock();
        if inner.job.as_ref() != Some(job) {
            return Err(PoolError::JobNotFound {
                job_id: job.to_string(),
            }
            .into());
        }
        for slot in inner.workers.drain(..) {
            let _ = slot.kill.send(true);
        }
        inner.job = None;
        inner.state = None;
        debug!(%job, "in-process job cancelled");
        Ok(())
    }
}

async fn worker_loop(
    id: WorkerId,
    state: Arc<PoolState>,
    runner: Arc<dyn TaskRunner>,
    request_tx: mpsc::Sender<WorkerRequest>,
    mut requests: mpsc::Receiver<WorkerRequest>,
    mut kill: watch::Receiver<bool>,
    admission_delay: Duration,
) {
    tokio::time::sleep(admission_delay).await;
    state.register_worker(WorkerChannel {
        id,
        requests: request_tx,
    });

    let mut store: HashMap<DatasetKey, Arc<Dataset>> = HashMap::new();

    let reason = loop {
        tokio::select! {
            _ = kill.changed() => break "evicted",
            request = requests.recv() => match request {
                None => break "released",
                Some(WorkerRequest::Upload { key, data }) => {
                    store.insert(key, data);
                }
                Some(WorkerRequest::Run { task, reply }) => {
                    let runner = Arc::clone(&runner);
                    let data = task.data.and_then(|key| store.get(&key).cloned());
                    let payload = task.payload.clone();
                    let seq = task.seq;

                    let execution =
                        tokio::task::spawn_blocking(move || runner.run(&payload, data.as_deref()));

                    tokio::select! {
                        _ = kill.changed() => break "evicted mid-task",
                        joined = execution => match joined {
                            Ok(outcome) => {
                                let completion = TaskCompletion {
                                    seq,
                                    worker: id,
                                    outcome: outcome.map_err(|e| e.to_string()),
                                };
                                let _ = reply.send(completion).await;
                            }
                            // A panicking payload takes the worker down with
                            // it; no reply is sent, so the task gets retried
                            // elsewhere.
                            Err(_) => break "crashed",
                        }
                    }
                }
            }
        }
    };

    state.deregister_worker(id, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::PoolEvent;
    use gs_types::ResourceSpec;
    use serde_json::json;

    struct EchoRunner;

    impl TaskRunner for EchoRunner {
        fn run(
            &self,
            payload: &serde_json::Value,
            _data: Option<&Dataset>,
        ) -> GsResult<serde_json::Value> {
            if payload.get("boom").is_some() {
                panic!("poisoned payload");
            }
            Ok(payload.clone())
        }
    }

    fn cluster() -> InProcessCluster {
        InProcessCluster::new(Arc::new(EchoRunner)).with_admission_delay(Duration::from_millis(1))
    }

    fn request(workers: usize) -> AllocationRequest {
        AllocationRequest {
            spec: ResourceSpec::new("test"),
            workers,
        }
    }

    async fn wait_for_workers(state: &Arc<PoolState>, count: usize) {
        let mut events = state.subscribe();
        while state.worker_count() < count {
            tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("worker never joined")
                .expect("event stream closed");
        }
    }

    #[tokio::test]
    async fn workers_join_after_submission() {
        let cluster = cluster();
        let state = PoolState::new();
        cluster.submit(&request(2), Arc::clone(&state)).await.unwrap();

        wait_for_workers(&state, 2).await;
        assert_eq!(state.worker_count(), 2);
    }

    #[tokio::test]
    async fn scale_down_evicts_workers() {
        let cluster = cluster();
        let state = PoolState::new();
        let job = cluster.submit(&request(2), Arc::clone(&state)).await.unwrap();
        wait_for_workers(&state, 2).await;

        let mut events = state.subscribe();
        cluster.set_worker_target(&job, 1).await.unwrap();

        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("no eviction event")
                .expect("event stream closed")
            {
                PoolEvent::WorkerLeft { reason, .. } => {
                    assert_eq!(reason, "evicted");
                    break;
                }
                PoolEvent::WorkerJoined { .. } => continue,
            }
        }
        assert_eq!(state.worker_count(), 1);
    }

    #[tokio::test]
    async fn worker_executes_and_replies() {
        let cluster = cluster();
        let state = PoolState::new();
        cluster.submit(&request(1), Arc::clone(&state)).await.unwrap();
        wait_for_workers(&state, 1).await;

        let worker = state.worker_ids()[0];
        let sender = state.request_sender(worker).unwrap();
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        sender
            .send(WorkerRequest::Run {
                task: crate::scheduler::TaskEnvelope {
                    id: Uuid::new_v4(),
                    seq: 0,
                    payload: json!({"x": 1}),
                    data: None,
                },
                reply: reply_tx,
            })
            .await
            .unwrap();

        let completion = tokio::time::timeout(Duration::from_secs(5), reply_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completion.seq, 0);
        assert_eq!(completion.outcome.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn panicking_payload_crashes_worker_without_reply() {
        let cluster = cluster();
        let state = PoolState::new();
        cluster.submit(&request(1), Arc::clone(&state)).await.unwrap();
        wait_for_workers(&state, 1).await;

        let worker = state.worker_ids()[0];
        let sender = state.request_sender(worker).unwrap();
        let mut events = state.subscribe();
        let (reply_tx, mut reply_rx) = mpsc::channel(1);

        sender
            .send(WorkerRequest::Run {
                task: crate::scheduler::TaskEnvelope {
                    id: Uuid::new_v4(),
                    seq: 0,
                    payload: json!({"boom": true}),
                    data: None,
                },
                reply: reply_tx,
            })
            .await
            .unwrap();

        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("worker never crashed")
                .expect("event stream closed")
            {
                PoolEvent::WorkerLeft { worker: left, reason } => {
                    assert_eq!(left, worker);
                    assert_eq!(reason, "crashed");
                    break;
                }
                PoolEvent::WorkerJoined { .. } => continue,
            }
        }
        // The reply channel is dropped without a completion.
        assert!(reply_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn kill_worker_evicts_immediately() {
        let cluster = cluster();
        let state = PoolState::new();
        cluster.submit(&request(1), Arc::clone(&state)).await.unwrap();
        wait_for_workers(&state, 1).await;

        let worker = state.worker_ids()[0];
        let mut events = state.subscribe();
        assert!(cluster.kill_worker(worker));
        assert!(!cluster.kill_worker(worker));

        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("worker never left")
            .expect("event stream closed")
        {
            PoolEvent::WorkerLeft { worker: left, reason } => {
                assert_eq!(left, worker);
                assert_eq!(reason, "evicted");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(state.worker_count(), 0);
    }
}
