//! Cross-validation fold construction.
//!
//! A [`FoldPlan`] is a pure function of `(rows, k, seed)`, so workers
//! rebuild it from the task payload instead of receiving index vectors
//! over the wire.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use gs_types::{validation_error, DataError, GsResult};

/// One train/validate partition of the row indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validate: Vec<usize>,
}

/// k disjoint validate sets covering every row exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPlan {
    folds: Vec<Fold>,
}

impl FoldPlan {
    /// Shuffle `0..rows` with the seed and cut the result into `k` folds
    /// whose sizes differ by at most one.
    pub fn new(rows: usize, k: usize, seed: u64) -> GsResult<Self> {
        if k < 2 || k > rows {
            return Err(DataError::FoldCount { folds: k, rows }.into());
        }

        let mut indices: Vec<usize> = (0..rows).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let base = rows / k;
        let extra = rows % k;
        let mut folds = Vec::with_capacity(k);
        let mut cursor = 0;

        for fold in 0..k {
            let size = base + usize::from(fold < extra);
            let validate: Vec<usize> = indices[cursor..cursor + size].to_vec();
            let train: Vec<usize> = indices[..cursor]
                .iter()
                .chain(indices[cursor + size..].iter())
                .copied()
                .collect();
            folds.push(Fold { train, validate });
            cursor += size;
        }

        Ok(Self { folds })
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn fold(&self, index: usize) -> GsResult<&Fold> {
        self.folds
            .get(index)
            .ok_or_else(|| validation_error!("fold index {index} out of range ({} folds)", self.folds.len()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fold> {
        self.folds.iter()
    }
}
