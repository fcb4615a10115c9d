//! # gs-tune
//!
//! Grid-search tuning driver for GridSpan.
//!
//! Builds one evaluation task per (candidate configuration × fold), runs
//! the batch through the currently active execution backend, aggregates
//! mean fold scores, and reports the best candidate. Ships a k-nearest-
//! neighbour baseline model so the whole pipeline runs end to end.

pub mod driver;
pub mod evaluator;
pub mod folds;
pub mod model;
pub mod report;

pub use driver::{GridSearchDriver, SweepConfig};
pub use evaluator::{EvalPayload, EvalRunner, KnnEvaluator, ModelEvaluator};
pub use folds::{Fold, FoldPlan};
pub use model::{FittedKnn, KnnClassifier};
pub use report::{CandidateScore, SweepEvent, SweepReport};
