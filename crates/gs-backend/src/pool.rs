//! Pooled execution: ship tasks to remote workers, gather in order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use gs_pool::{ExecutionContext, PoolEvent, TaskCompletion, TaskEnvelope, WorkerId, WorkerRequest};
use gs_types::{internal_error, Dataset, DatasetKey, ExecError, GsResult};

/// Bounded task-level retry for worker loss.
///
/// `max_retries` counts re-submissions per task; evaluation errors reported
/// by a live worker are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

/// Executes task batches on a connected worker pool.
///
/// Tasks are independent; at most one is in flight per worker. Results come
/// back in submission order regardless of completion order. When a worker
/// leaves mid-task the task is re-queued, up to the retry budget. Without a
/// deadline a map over a pool whose workers have all died waits for the
/// scheduler to admit replacements — callers that cannot tolerate that
/// should set one.
pub struct PoolBackend {
    context: ExecutionContext,
    retry: RetryPolicy,
    deadline: Option<Duration>,
}

impl PoolBackend {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            retry: RetryPolicy::default(),
            deadline: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overall wall-clock limit for a whole `map` call. On expiry,
    /// outstanding tasks are abandoned (workers may keep running them) and
    /// the call fails.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Broadcast a dataset to the pool for tasks to reference.
    pub async fn broadcast(&self, data: Arc<Dataset>) -> DatasetKey {
        self.context.broadcast(data).await
    }

    /// Execute every task exactly once (barring worker failure) and return
    /// results in submission order.
    pub async fn map(&self, tasks: Vec<TaskEnvelope>) -> GsResult<Vec<serde_json::Value>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, self.execute(&tasks)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        tasks = tasks.len(),
                        "map deadline exceeded; abandoning outstanding tasks"
                    );
                    Err(ExecError::DeadlineExceeded {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                    .into())
                }
            },
            None => self.execute(&tasks).await,
        }
    }

    async fn execute(&self, tasks: &[TaskEnvelope]) -> GsResult<Vec<serde_json::Value>> {
        let state = self.context.state();
        // Subscribe before snapshotting the idle set so no membership change
        // slips between the two.
        let mut events = state.subscribe();

        let total = tasks.len();
        let (reply_tx, mut reply_rx) = mpsc::channel::<TaskCompletion>(total.max(1));

        // Replay recorded broadcasts to every current worker: some may have
        // been admitted after the data was broadcast.
        for worker in state.worker_ids() {
            self.context.sync_worker(worker).await;
        }

        let mut results: Vec<Option<serde_json::Value>> = vec![None; total];
        let mut attempts: Vec<usize> = vec![0; total];
        let mut pending: VecDeque<usize> = (0..total).collect();
        let mut in_flight: HashMap<WorkerId, usize> = HashMap::new();
        let mut idle: VecDeque<WorkerId> = state.worker_ids().into();
        let mut completed = 0usize;

        debug!(total, workers = idle.len(), "pooled map started");

        loop {
            // Greedy dispatch: one task per idle worker.
            while !pending.is_empty() {
                let Some(worker) = idle.pop_front() else {
                    break;
                };
                let Some(sender) = state.request_sender(worker) else {
                    // Already gone; its WorkerLeft event does the cleanup.
                    continue;
                };
                let Some(index) = pending.pop_front() else {
                    break;
                };

                let run = WorkerRequest::Run {
                    task: tasks[index].clone(),
                    reply: reply_tx.clone(),
                };
                if sender.send(run).await.is_err() {
                    // Queue closed between lookup and send; no attempt charged.
                    pending.push_front(index);
                    continue;
                }
                in_flight.insert(worker, index);
            }

            if completed == total {
                break;
            }

            if in_flight.is_empty() && idle.is_empty() && state.worker_count() == 0 {
                warn!(
                    outstanding = total - completed,
                    "no workers left; waiting for the scheduler to admit replacements"
                );
            }

            tokio::select! {
                completion = reply_rx.recv() => {
                    let Some(completion) = completion else {
                        return Err(internal_error!("completion channel closed mid-map"));
                    };
                    self.on_completion(
                        completion,
                        &mut results,
                        &mut pending,
                        &mut in_flight,
                        &mut idle,
                        &mut completed,
                    )?;
                }
                event = events.recv() => match event {
                    Ok(PoolEvent::WorkerJoined { worker }) => {
                        // Late joiner: replay broadcasts before assigning work.
                        // The containment checks keep a worker from entering
                        // the idle set twice after a lagged-stream resync.
                        if !idle.contains(&worker) && !in_flight.contains_key(&worker) {
                            self.context.sync_worker(worker).await;
                            idle.push_back(worker);
                        }
                    }
                    Ok(PoolEvent::WorkerLeft { worker, reason }) => {
                        idle.retain(|w| *w != worker);
                        if let Some(index) = in_flight.remove(&worker) {
                            if results[index].is_none() {
                                attempts[index] += 1;
                                if attempts[index] > self.retry.max_retries {
                                    return Err(ExecError::RetriesExhausted {
                                        task_index: index,
                                        task_id: tasks[index].id,
                                        attempts: attempts[index],
                                    }
                                    .into());
                                }
                                warn!(
                                    task = index,
                                    %worker,
                                    reason,
                                    attempt = attempts[index],
                                    "worker lost mid-task; re-queueing"
                                );
                                pending.push_back(index);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "pool event stream lagged");
                        // Re-sync the idle set from the registry.
                        idle = state
                            .worker_ids()
                            .into_iter()
                            .filter(|w| !in_flight.contains_key(w))
                            .collect();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ExecError::ConnectionLost {
                            message: "pool event stream closed".to_string(),
                        }
                        .into());
                    }
                }
            }
        }

        debug!(total, "pooled map finished");
        results
            .into_iter()
            .map(|slot| slot.ok_or_else(|| internal_error!("missing result slot")))
            .collect()
    }

    fn on_completion(
        &self,
        completion: TaskCompletion,
        results: &mut [Option<serde_json::Value>],
        pending: &mut VecDeque<usize>,
        in_flight: &mut HashMap<WorkerId, usize>,
        idle: &mut VecDeque<WorkerId>,
        completed: &mut usize,
    ) -> GsResult<()> {
        let index = completion.seq;

        if in_flight.get(&completion.worker) == Some(&index) {
            in_flight.remove(&completion.worker);
            idle.push_back(completion.worker);
        }

        // A retried task can produce a second result; first one wins.
        if results[index].is_some() {
            debug!(task = index, "duplicate result ignored");
            return Ok(());
        }

        match completion.outcome {
            Ok(value) => {
                results[index] = Some(value);
                *completed += 1;
                // If the original worker beat its retry, drop the re-queued copy.
                pending.retain(|&i| i != index);
                Ok(())
            }
            Err(message) => Err(ExecError::TaskFailed {
                task_index: index,
                message,
            }
            .into()),
        }
    }
}
