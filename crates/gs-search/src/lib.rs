//! # gs-search
//!
//! Parameter grid definition and candidate enumeration for GridSpan.
//!
//! A [`ParamGrid`] maps parameter names to finite candidate sequences; its
//! cross product is enumerated lazily as [`CandidateConfig`]s in a fixed,
//! documented order.

mod grid;

pub use grid::{CandidateConfig, CandidateIter, ParamAxis, ParamGrid, ParamValue};
