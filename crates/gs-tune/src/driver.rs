//! Grid-search driver: candidate × fold fan-out over the active backend.

use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use gs_backend::{Backend, BackendSwitch};
use gs_pool::{PoolHandle, TaskEnvelope};
use gs_search::{CandidateConfig, ParamGrid};
use gs_types::{Dataset, ExecError, GsError, GsResult};

use crate::evaluator::EvalPayload;
use crate::folds::FoldPlan;
use crate::report::{CandidateScore, SweepEvent, SweepReport};

/// What to sweep and how to fold the data.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub grid: ParamGrid,
    pub folds: usize,
    pub fold_seed: u64,
}

impl SweepConfig {
    pub fn new(grid: ParamGrid) -> Self {
        Self {
            grid,
            folds: 5,
            fold_seed: 17,
        }
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_fold_seed(mut self, seed: u64) -> Self {
        self.fold_seed = seed;
        self
    }
}

/// Evaluates every candidate configuration against every fold and selects
/// the best by mean fold score.
///
/// The driver does not execute anything itself: it activates the supplied
/// backend on the switch for the duration of the run and sends the task
/// batch through whatever backend the switch then reports as current. Ties
/// on the mean score go to the first-enumerated candidate.
pub struct GridSearchDriver {
    config: SweepConfig,
    events: Option<Sender<SweepEvent>>,
}

impl GridSearchDriver {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Emit progress events on this channel.
    pub fn with_events(mut self, events: Sender<SweepEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the sweep.
    ///
    /// If a pool handle is supplied it is released before any error
    /// propagates, so failed sweeps never leak compute allocations. On
    /// success the pool is left running for the caller to reuse or release.
    pub async fn run(
        &self,
        dataset: &Arc<Dataset>,
        switch: &BackendSwitch,
        backend: Arc<Backend>,
        pool: Option<&PoolHandle>,
    ) -> GsResult<SweepReport> {
        match self.run_inner(dataset, switch, backend).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.release_pool(pool, &err).await;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        dataset: &Arc<Dataset>,
        switch: &BackendSwitch,
        backend: Arc<Backend>,
    ) -> GsResult<SweepReport> {
        let started = Instant::now();
        let folds = self.config.folds;

        let candidates: Vec<CandidateConfig> = self.config.grid.enumerate()?.collect();
        // Validate the fold geometry before any work is dispatched.
        FoldPlan::new(dataset.len(), folds, self.config.fold_seed)?;

        let key = backend.broadcast(Arc::clone(dataset)).await;

        let mut tasks = Vec::with_capacity(candidates.len() * folds);
        for (candidate_index, candidate) in candidates.iter().enumerate() {
            for fold in 0..folds {
                let payload = serde_json::to_value(EvalPayload {
                    params: candidate.clone(),
                    fold,
                    folds,
                    seed: self.config.fold_seed,
                })?;
                tasks.push(TaskEnvelope {
                    id: Uuid::new_v4(),
                    seq: candidate_index * folds + fold,
                    payload,
                    data: Some(key),
                });
            }
        }
        let task_count = tasks.len();

        info!(
            candidates = candidates.len(),
            folds,
            tasks = task_count,
            "sweep started"
        );
        self.emit(SweepEvent::Started {
            candidates: candidates.len(),
            folds,
            tasks: task_count,
        });

        let raw = {
            let _scope = switch.activate(backend);
            self.emit(SweepEvent::BackendActivated {
                pooled: !switch.current().is_local(),
            });
            switch.current().map(tasks).await?
            // _scope drops here: the previous backend is restored whether
            // the map succeeded or not.
        };

        let scores = self.aggregate(candidates, raw, folds)?;
        let best_index = Self::select_best(&scores);

        let report = SweepReport {
            best: scores[best_index].clone(),
            best_index,
            candidates: scores,
            tasks_executed: task_count,
            elapsed: started.elapsed(),
            finished_at: chrono::Utc::now(),
        };

        info!(
            best = %report.best.candidate,
            mean_score = report.best.mean_score,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sweep completed"
        );
        self.emit(SweepEvent::Completed {
            best_mean: report.best.mean_score,
            elapsed_ms: report.elapsed.as_millis() as u64,
        });
        Ok(report)
    }

    fn aggregate(
        &self,
        candidates: Vec<CandidateConfig>,
        raw: Vec<serde_json::Value>,
        folds: usize,
    ) -> GsResult<Vec<CandidateScore>> {
        if raw.len() != candidates.len() * folds {
            return Err(gs_types::internal_error!(
                "backend returned {} results for {} tasks",
                raw.len(),
                candidates.len() * folds
            ));
        }

        let mut scores = Vec::with_capacity(candidates.len());
        for (candidate_index, candidate) in candidates.into_iter().enumerate() {
            let slice = &raw[candidate_index * folds..(candidate_index + 1) * folds];
            let fold_scores: Vec<f64> = slice
                .iter()
                .map(|value| {
                    value.as_f64().ok_or_else(|| {
                        GsError::from(ExecError::ResultDecode {
                            message: format!("expected a numeric score, got {value}"),
                        })
                    })
                })
                .collect::<GsResult<_>>()?;

            let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
            scores.push(CandidateScore {
                candidate,
                fold_scores,
                mean_score,
            });
        }
        Ok(scores)
    }

    /// Strictly-greater comparison, so equal means keep the earlier
    /// candidate: first-enumerated wins ties.
    fn select_best(scores: &[CandidateScore]) -> usize {
        let mut best = 0;
        for (index, score) in scores.iter().enumerate().skip(1) {
            if score.mean_score > scores[best].mean_score {
                best = index;
            }
        }
        best
    }

    async fn release_pool(&self, pool: Option<&PoolHandle>, err: &GsError) {
        let Some(handle) = pool else {
            return;
        };
        warn!(error = %err, "sweep failed; releasing worker pool");
        if let Err(release_err) = handle.release().await {
            warn!(error = %release_err, "pool release failed");
        }
        self.emit(SweepEvent::PoolReleased {
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: SweepEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}
