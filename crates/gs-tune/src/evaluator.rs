//! The fit-and-score seam between the driver and the workers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use gs_pool::TaskRunner;
use gs_search::CandidateConfig;
use gs_types::{validation_error, Dataset, DatasetView, GsResult};

use crate::folds::FoldPlan;
use crate::model::KnnClassifier;

/// Fits a model with the candidate's hyper-parameters on the training rows
/// and scores it on the validation rows. Implementations must be pure
/// functions of their inputs — the backend may run them anywhere, in any
/// order, and more than once after a worker loss.
pub trait ModelEvaluator: Send + Sync {
    fn fit_score(
        &self,
        params: &CandidateConfig,
        train: DatasetView<'_>,
        validate: DatasetView<'_>,
    ) -> GsResult<f64>;
}

/// Wire payload of one evaluation task.
///
/// Folds travel as `(fold, folds, seed)` rather than index vectors: the
/// plan is deterministic, so the worker rebuilds it against the broadcast
/// dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalPayload {
    pub params: CandidateConfig,
    pub fold: usize,
    pub folds: usize,
    pub seed: u64,
}

/// Worker-side adapter: decodes [`EvalPayload`]s and runs the evaluator.
pub struct EvalRunner<E> {
    evaluator: Arc<E>,
}

impl<E: ModelEvaluator> EvalRunner<E> {
    pub fn new(evaluator: Arc<E>) -> Self {
        Self { evaluator }
    }
}

impl<E: ModelEvaluator> TaskRunner for EvalRunner<E> {
    fn run(
        &self,
        payload: &serde_json::Value,
        data: Option<&Dataset>,
    ) -> GsResult<serde_json::Value> {
        let request: EvalPayload = serde_json::from_value(payload.clone())?;
        let dataset =
            data.ok_or_else(|| validation_error!("evaluation task requires a broadcast dataset"))?;

        let plan = FoldPlan::new(dataset.len(), request.folds, request.seed)?;
        let fold = plan.fold(request.fold)?;

        let score = self.evaluator.fit_score(
            &request.params,
            dataset.view(&fold.train),
            dataset.view(&fold.validate),
        )?;
        Ok(serde_json::json!(score))
    }
}

/// Accuracy of a [`KnnClassifier`] built from the candidate.
pub struct KnnEvaluator;

impl ModelEvaluator for KnnEvaluator {
    fn fit_score(
        &self,
        params: &CandidateConfig,
        train: DatasetView<'_>,
        validate: DatasetView<'_>,
    ) -> GsResult<f64> {
        let model = KnnClassifier::from_params(params)?;
        let fitted = model.fit(train)?;
        Ok(fitted.accuracy(validate))
    }
}
