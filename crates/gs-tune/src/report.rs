//! Sweep results and progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use gs_search::CandidateConfig;

/// Aggregate score of one candidate across all folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub candidate: CandidateConfig,
    /// Per-fold scores in fold order.
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

/// Outcome of a completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Highest mean score; ties go to the first-enumerated candidate.
    pub best: CandidateScore,
    /// Enumeration index of the best candidate.
    pub best_index: usize,
    /// All candidates in enumeration order.
    pub candidates: Vec<CandidateScore>,
    pub tasks_executed: usize,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Progress events emitted by the driver for external consumption
/// (logging, UI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepEvent {
    Started {
        candidates: usize,
        folds: usize,
        tasks: usize,
    },
    BackendActivated {
        pooled: bool,
    },
    Completed {
        best_mean: f64,
        elapsed_ms: u64,
    },
    PoolReleased {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_search::ParamGrid;

    #[test]
    fn report_round_trips_through_json() {
        let candidate = ParamGrid::new()
            .add_ints("n_neighbors", vec![3])
            .enumerate()
            .unwrap()
            .next()
            .unwrap();

        let score = CandidateScore {
            candidate,
            fold_scores: vec![0.8, 0.9],
            mean_score: 0.85,
        };
        let report = SweepReport {
            best: score.clone(),
            best_index: 0,
            candidates: vec![score],
            tasks_executed: 2,
            elapsed: Duration::from_millis(120),
            finished_at: Utc::now(),
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: SweepReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
    }
}
