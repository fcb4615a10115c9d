//! In-memory dataset representation shared by the tuning driver and the
//! worker pool.
//!
//! A [`Dataset`] is a dense feature matrix plus a label vector, already
//! normalized by the caller. Workers never receive row copies per task:
//! the dataset is broadcast once per pool and referenced by [`DatasetKey`].

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DataError, GsResult};

/// Handle referencing a dataset broadcast to the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey(Uuid);

impl DatasetKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dense, immutable classification dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    features: Vec<Vec<f64>>,
    labels: Vec<u32>,
    n_features: usize,
}

impl Dataset {
    /// Build a dataset from a feature matrix and label vector.
    ///
    /// Every row must have the same width and the label vector must match
    /// the row count.
    pub fn new(features: Vec<Vec<f64>>, labels: Vec<u32>) -> GsResult<Self> {
        if features.is_empty() {
            return Err(DataError::Empty.into());
        }
        if features.len() != labels.len() {
            return Err(DataError::LabelMismatch {
                rows: features.len(),
                labels: labels.len(),
            }
            .into());
        }

        let n_features = features[0].len();
        for (row, values) in features.iter().enumerate() {
            if values.len() != n_features {
                return Err(DataError::RaggedRow {
                    row,
                    got: values.len(),
                    expected: n_features,
                }
                .into());
            }
        }

        Ok(Self {
            features,
            labels,
            n_features,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.features[index]
    }

    pub fn label(&self, index: usize) -> u32 {
        self.labels[index]
    }

    /// View over a subset of rows (e.g. one side of a fold).
    pub fn view<'a>(&'a self, rows: &'a [usize]) -> DatasetView<'a> {
        DatasetView { data: self, rows }
    }

    /// Split into (train, test) datasets with a seeded shuffle.
    ///
    /// `test_fraction` must be in (0, 1) and both sides must end up
    /// non-empty.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> GsResult<(Dataset, Dataset)> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(DataError::InvalidSplit {
                fraction: test_fraction,
            }
            .into());
        }
        if self.len() < 2 {
            return Err(DataError::TooSmall {
                rows: self.len(),
                needed: 2,
            }
            .into());
        }

        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let n_test = ((self.len() as f64) * test_fraction).round() as usize;
        let n_test = n_test.clamp(1, self.len() - 1);

        let (test_idx, train_idx) = indices.split_at(n_test);
        Ok((self.subset(train_idx), self.subset(test_idx)))
    }

    fn subset(&self, rows: &[usize]) -> Dataset {
        Dataset {
            features: rows.iter().map(|&i| self.features[i].clone()).collect(),
            labels: rows.iter().map(|&i| self.labels[i]).collect(),
            n_features: self.n_features,
        }
    }
}

/// Borrowed view over a subset of a dataset's rows.
///
/// Index arguments are positions within the view, not within the underlying
/// dataset.
#[derive(Debug, Clone, Copy)]
pub struct DatasetView<'a> {
    data: &'a Dataset,
    rows: &'a [usize],
}

impl<'a> DatasetView<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.data.n_features()
    }

    pub fn features(&self, index: usize) -> &'a [f64] {
        self.data.row(self.rows[index])
    }

    pub fn label(&self, index: usize) -> u32 {
        self.data.label(self.rows[index])
    }
}
