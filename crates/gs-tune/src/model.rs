//! Baseline k-nearest-neighbour classifier.
//!
//! Stands in for the external estimator so the tuning pipeline runs end to
//! end. Two hyper-parameters are exposed to the grid: `n_neighbors` and
//! `distance_power` (the Minkowski exponent; 1 = Manhattan, 2 = Euclidean).

use std::collections::HashMap;

use gs_search::CandidateConfig;
use gs_types::{validation_error, DatasetView, GsResult};

/// Hyper-parameters of the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnnClassifier {
    n_neighbors: usize,
    distance_power: f64,
}

impl KnnClassifier {
    pub fn new(n_neighbors: usize, distance_power: f64) -> GsResult<Self> {
        if n_neighbors == 0 {
            return Err(validation_error!("n_neighbors must be at least 1"));
        }
        if !(distance_power > 0.0) {
            return Err(validation_error!(
                "distance_power must be positive, got {distance_power}"
            ));
        }
        Ok(Self {
            n_neighbors,
            distance_power,
        })
    }

    /// Build a classifier from a grid candidate.
    pub fn from_params(params: &CandidateConfig) -> GsResult<Self> {
        let n_neighbors = params.get_i64("n_neighbors")?;
        if n_neighbors < 1 {
            return Err(validation_error!(
                "n_neighbors must be at least 1, got {n_neighbors}"
            ));
        }
        let distance_power = params.get_f64("distance_power")?;
        Self::new(n_neighbors as usize, distance_power)
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Fit on the training rows. Lazy learner: fitting stores the view.
    pub fn fit<'a>(&self, train: DatasetView<'a>) -> GsResult<FittedKnn<'a>> {
        if train.is_empty() {
            return Err(gs_types::DataError::Empty.into());
        }
        Ok(FittedKnn {
            params: *self,
            train,
        })
    }
}

/// A fitted classifier bound to its training rows.
#[derive(Debug, Clone, Copy)]
pub struct FittedKnn<'a> {
    params: KnnClassifier,
    train: DatasetView<'a>,
}

impl FittedKnn<'_> {
    /// Predict the label for one feature row: majority vote among the k
    /// nearest training rows, ties broken by the smallest label.
    pub fn predict(&self, features: &[f64]) -> u32 {
        let mut neighbors: Vec<(f64, u32)> = (0..self.train.len())
            .map(|i| (self.distance(features, self.train.features(i)), self.train.label(i)))
            .collect();
        neighbors.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let k = self.params.n_neighbors.min(neighbors.len());
        let mut votes: HashMap<u32, usize> = HashMap::new();
        for (_, label) in &neighbors[..k] {
            *votes.entry(*label).or_insert(0) += 1;
        }

        let mut winner = (0usize, u32::MAX);
        for (&label, &count) in &votes {
            if count > winner.0 || (count == winner.0 && label < winner.1) {
                winner = (count, label);
            }
        }
        winner.1
    }

    /// Fraction of correctly classified rows; 0.0 for an empty view.
    pub fn accuracy(&self, test: DatasetView<'_>) -> f64 {
        if test.is_empty() {
            return 0.0;
        }
        let correct = (0..test.len())
            .filter(|&i| self.predict(test.features(i)) == test.label(i))
            .count();
        correct as f64 / test.len() as f64
    }

    /// Minkowski distance raised to the p-th power. Monotone in the true
    /// distance, so the root is skipped for neighbor ranking.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs().powf(self.params.distance_power))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_search::ParamGrid;
    use gs_types::Dataset;

    fn clustered_dataset() -> Dataset {
        // Two tight clusters around (0, 0) and (1, 1).
        let features = vec![
            vec![0.0, 0.1],
            vec![0.1, 0.0],
            vec![0.05, 0.05],
            vec![1.0, 0.9],
            vec![0.9, 1.0],
            vec![0.95, 0.95],
        ];
        let labels = vec![0, 0, 0, 1, 1, 1];
        Dataset::new(features, labels).unwrap()
    }

    fn all_rows(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn predicts_cluster_membership() {
        let data = clustered_dataset();
        let rows = all_rows(data.len());
        let model = KnnClassifier::new(3, 2.0).unwrap();
        let fitted = model.fit(data.view(&rows)).unwrap();

        assert_eq!(fitted.predict(&[0.02, 0.08]), 0);
        assert_eq!(fitted.predict(&[0.97, 0.92]), 1);
    }

    #[test]
    fn single_neighbor_matches_nearest_point() {
        let data = clustered_dataset();
        let rows = all_rows(data.len());
        let model = KnnClassifier::new(1, 1.0).unwrap();
        let fitted = model.fit(data.view(&rows)).unwrap();

        assert_eq!(fitted.predict(&[0.05, 0.05]), 0);
    }

    #[test]
    fn vote_ties_pick_smallest_label() {
        let data = Dataset::new(
            vec![vec![0.0], vec![1.0]],
            vec![7, 3],
        )
        .unwrap();
        let rows = all_rows(2);
        let model = KnnClassifier::new(2, 2.0).unwrap();
        let fitted = model.fit(data.view(&rows)).unwrap();

        // Both neighbors vote once; label 3 wins the tie.
        assert_eq!(fitted.predict(&[0.5]), 3);
    }

    #[test]
    fn accuracy_on_training_rows_is_perfect_for_k1() {
        let data = clustered_dataset();
        let rows = all_rows(data.len());
        let model = KnnClassifier::new(1, 2.0).unwrap();
        let fitted = model.fit(data.view(&rows)).unwrap();

        assert_eq!(fitted.accuracy(data.view(&rows)), 1.0);
    }

    #[test]
    fn from_params_reads_the_grid_candidate() {
        let grid = ParamGrid::new()
            .add_ints("n_neighbors", vec![3])
            .add_floats("distance_power", vec![1.0]);
        let candidate = grid.enumerate().unwrap().next().unwrap();

        let model = KnnClassifier::from_params(&candidate).unwrap();
        assert_eq!(model.n_neighbors(), 3);
    }

    #[test]
    fn from_params_rejects_bad_values() {
        let grid = ParamGrid::new()
            .add_ints("n_neighbors", vec![0])
            .add_floats("distance_power", vec![2.0]);
        let candidate = grid.enumerate().unwrap().next().unwrap();
        assert!(KnnClassifier::from_params(&candidate).is_err());

        let grid = ParamGrid::new().add_ints("n_neighbors", vec![3]);
        let candidate = grid.enumerate().unwrap().next().unwrap();
        // distance_power missing entirely.
        assert!(KnnClassifier::from_params(&candidate).is_err());
    }

    #[test]
    fn zero_neighbors_is_rejected() {
        assert!(KnnClassifier::new(0, 2.0).is_err());
        assert!(KnnClassifier::new(1, 0.0).is_err());
    }
}
