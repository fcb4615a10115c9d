//! Parameter grids and the lazy cross-product enumerator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use gs_types::{GsResult, SearchError};

/// A concrete candidate value for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// A single parameter dimension: a name plus its ordered candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamAxis {
    pub name: String,
    pub candidates: Vec<ParamValue>,
}

/// A declarative parameter grid: an ordered list of axes.
///
/// Axis order is significant — enumeration varies the first axis slowest
/// and the last axis fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    axes: Vec<ParamAxis>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self { axes: Vec::new() }
    }

    /// Append an axis with explicit candidate values.
    pub fn add(mut self, name: impl Into<String>, candidates: Vec<ParamValue>) -> Self {
        self.axes.push(ParamAxis {
            name: name.into(),
            candidates,
        });
        self
    }

    pub fn add_ints(self, name: impl Into<String>, values: Vec<i64>) -> Self {
        self.add(name, values.into_iter().map(ParamValue::Int).collect())
    }

    pub fn add_floats(self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.add(name, values.into_iter().map(ParamValue::Float).collect())
    }

    pub fn add_strs(self, name: impl Into<String>, values: Vec<&str>) -> Self {
        self.add(
            name,
            values
                .into_iter()
                .map(|v| ParamValue::Json(serde_json::Value::String(v.to_string())))
                .collect(),
        )
    }

    pub fn axes(&self) -> &[ParamAxis] {
        &self.axes
    }

    /// Total number of candidate configurations.
    pub fn size(&self) -> GsResult<usize> {
        self.validate()?;
        let mut total: usize = 1;
        for axis in &self.axes {
            total = total
                .checked_mul(axis.candidates.len())
                .ok_or(SearchError::TooLarge { max: usize::MAX })?;
        }
        Ok(total)
    }

    /// Lazily enumerate the cross product.
    ///
    /// Candidate `i` is the mixed-radix decomposition of `i` over the axis
    /// lengths: the first axis varies slowest, the last axis fastest.
    pub fn enumerate(&self) -> GsResult<CandidateIter<'_>> {
        let total = self.size()?;
        tracing::debug!("enumerating {} candidates over {} axes", total, self.axes.len());
        Ok(CandidateIter {
            grid: self,
            next: 0,
            total,
        })
    }

    fn validate(&self) -> GsResult<()> {
        if self.axes.is_empty() {
            return Err(SearchError::EmptyGrid.into());
        }
        for axis in &self.axes {
            if axis.candidates.is_empty() {
                return Err(SearchError::EmptyAxis {
                    parameter: axis.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn candidate_at(&self, index: usize) -> CandidateConfig {
        let mut values = BTreeMap::new();
        let mut remainder = index;
        for axis in self.axes.iter().rev() {
            let len = axis.candidates.len();
            values.insert(axis.name.clone(), axis.candidates[remainder % len].clone());
            remainder /= len;
        }
        CandidateConfig { values }
    }
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over a grid's candidate configurations.
#[derive(Debug, Clone)]
pub struct CandidateIter<'a> {
    grid: &'a ParamGrid,
    next: usize,
    total: usize,
}

impl Iterator for CandidateIter<'_> {
    type Item = CandidateConfig;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let candidate = self.grid.candidate_at(self.next);
        self.next += 1;
        Some(candidate)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CandidateIter<'_> {}

/// One concrete assignment of values to all grid parameters.
///
/// Immutable once produced; stored as a `BTreeMap` so serialization and
/// display order are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    values: BTreeMap<String, ParamValue>,
}

impl CandidateConfig {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Integer parameter, failing if absent or of a different type.
    pub fn get_i64(&self, name: &str) -> GsResult<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(other) => Err(SearchError::ParameterType {
                parameter: name.to_string(),
                message: format!("expected integer, got {other}"),
            }
            .into()),
            None => Err(SearchError::MissingParameter {
                parameter: name.to_string(),
            }
            .into()),
        }
    }

    /// Float parameter; integer candidates widen losslessly enough for
    /// hyper-parameter use.
    pub fn get_f64(&self, name: &str) -> GsResult<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(SearchError::ParameterType {
                parameter: name.to_string(),
                message: format!("expected number, got {other}"),
            }
            .into()),
            None => Err(SearchError::MissingParameter {
                parameter: name.to_string(),
            }
            .into()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl std::fmt::Display for CandidateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        write!(f, "{{")?;
        for (name, value) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn two_by_two() -> ParamGrid {
        ParamGrid::new()
            .add_ints("a", vec![1, 2])
            .add_ints("b", vec![10, 20])
    }

    #[test]
    fn size_is_product_of_axis_lengths() {
        let grid = ParamGrid::new()
            .add_ints("a", vec![1, 2, 3])
            .add_ints("b", vec![10, 11])
            .add_strs("c", vec!["x", "y", "z"]);
        assert_eq!(grid.size().unwrap(), 18);
    }

    #[test]
    fn enumeration_count_and_uniqueness() {
        let grid = ParamGrid::new()
            .add_ints("a", vec![1, 2, 3])
            .add_ints("b", vec![10, 11])
            .add_floats("c", vec![0.1, 0.2]);

        let candidates: Vec<_> = grid.enumerate().unwrap().collect();
        assert_eq!(candidates.len(), 12);

        let unique: HashSet<String> = candidates
            .iter()
            .map(|c| serde_json::to_string(c).unwrap())
            .collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn first_axis_varies_slowest() {
        let candidates: Vec<_> = two_by_two().enumerate().unwrap().collect();
        let pairs: Vec<(i64, i64)> = candidates
            .iter()
            .map(|c| (c.get_i64("a").unwrap(), c.get_i64("b").unwrap()))
            .collect();
        assert_eq!(pairs, vec![(1, 10), (1, 20), (2, 10), (2, 20)]);
    }

    #[test]
    fn specific_index_value() {
        let grid = ParamGrid::new()
            .add_ints("outer", vec![0, 1, 2])
            .add_ints("inner", vec![0, 1, 2, 3]);
        let candidate = grid.enumerate().unwrap().nth(7).unwrap();
        // 7 = 1 * 4 + 3
        assert_eq!(candidate.get_i64("outer").unwrap(), 1);
        assert_eq!(candidate.get_i64("inner").unwrap(), 3);
    }

    #[test]
    fn iterator_is_exact_size() {
        let grid = two_by_two();
        let mut iter = grid.enumerate().unwrap();
        assert_eq!(iter.len(), 4);
        iter.next();
        assert_eq!(iter.len(), 3);
    }

    #[test]
    fn empty_grid_is_rejected() {
        assert!(matches!(
            ParamGrid::new().enumerate(),
            Err(gs_types::GsError::Search(SearchError::EmptyGrid))
        ));
    }

    #[test]
    fn empty_axis_is_rejected() {
        let grid = ParamGrid::new()
            .add_ints("a", vec![1])
            .add_ints("b", vec![]);
        match grid.enumerate() {
            Err(gs_types::GsError::Search(SearchError::EmptyAxis { parameter })) => {
                assert_eq!(parameter, "b");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn typed_getters() {
        let candidate = two_by_two().enumerate().unwrap().next().unwrap();
        assert_eq!(candidate.get_i64("a").unwrap(), 1);
        assert_eq!(candidate.get_f64("a").unwrap(), 1.0);
        assert!(candidate.get_i64("missing").is_err());
    }

    #[test]
    fn display_is_deterministic() {
        let candidate = two_by_two().enumerate().unwrap().next().unwrap();
        assert_eq!(candidate.to_string(), "{a=1, b=10}");
    }
}
