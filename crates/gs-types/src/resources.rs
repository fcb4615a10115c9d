//! Resource specification for batch-scheduled worker allocations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{GsResult, PoolError};

/// Resource constraints and operational parameters for one worker allocation
/// submitted to the batch scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Job name used in scheduler submissions and log file names.
    pub job_name: String,

    /// CPU cores per worker process.
    pub cores_per_worker: usize,

    /// Memory ceiling per worker in MB.
    pub memory_mb: u64,

    /// Wall-clock limit per allocation in minutes.
    pub walltime_minutes: u64,

    /// Worker processes started by a single allocation.
    pub workers_per_allocation: usize,

    /// Number of allocations requested at provision time.
    pub target_allocations: usize,

    /// Directory for scheduler and worker log files.
    pub log_dir: PathBuf,

    /// Directory for on-disk spill data (unused when spilling is disabled).
    pub spill_dir: PathBuf,

    /// Whether workers may spill to disk when approaching the memory
    /// ceiling. `false` means fail fast instead of thrashing.
    pub spill_to_disk: bool,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            job_name: "gridspan-worker".to_string(),
            cores_per_worker: 1,
            memory_mb: 2048,
            walltime_minutes: 60,
            workers_per_allocation: 1,
            target_allocations: 1,
            log_dir: PathBuf::from("logs"),
            spill_dir: PathBuf::from("spill"),
            spill_to_disk: false,
        }
    }
}

impl ResourceSpec {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Self::default()
        }
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores_per_worker = cores;
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_walltime_minutes(mut self, minutes: u64) -> Self {
        self.walltime_minutes = minutes;
        self
    }

    pub fn with_workers_per_allocation(mut self, workers: usize) -> Self {
        self.workers_per_allocation = workers;
        self
    }

    pub fn with_target_allocations(mut self, allocations: usize) -> Self {
        self.target_allocations = allocations;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    pub fn with_spill_to_disk(mut self, spill: bool) -> Self {
        self.spill_to_disk = spill;
        self
    }

    /// Total worker processes this spec asks for initially.
    pub fn initial_workers(&self) -> usize {
        self.workers_per_allocation * self.target_allocations
    }

    /// Wall-clock limit formatted as `HH:MM:SS` for scheduler directives.
    pub fn walltime_hms(&self) -> String {
        format!("{:02}:{:02}:00", self.walltime_minutes / 60, self.walltime_minutes % 60)
    }

    /// Check the spec before submission.
    pub fn validate(&self) -> GsResult<()> {
        let reject = |message: String| -> GsResult<()> {
            Err(PoolError::MalformedSpec { message }.into())
        };

        if self.job_name.trim().is_empty() {
            return reject("job name is empty".into());
        }
        if self.cores_per_worker == 0 {
            return reject("cores_per_worker must be at least 1".into());
        }
        if self.memory_mb == 0 {
            return reject("memory_mb must be non-zero".into());
        }
        if self.walltime_minutes == 0 {
            return reject("walltime_minutes must be non-zero".into());
        }
        if self.workers_per_allocation == 0 {
            return reject("workers_per_allocation must be at least 1".into());
        }
        if self.target_allocations == 0 {
            return reject("target_allocations must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_validates() {
        assert!(ResourceSpec::default().validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let spec = ResourceSpec::new("tune")
            .with_cores(4)
            .with_memory_mb(8192)
            .with_walltime_minutes(90)
            .with_workers_per_allocation(2)
            .with_target_allocations(3)
            .with_spill_to_disk(true);

        assert_eq!(spec.cores_per_worker, 4);
        assert_eq!(spec.initial_workers(), 6);
        assert_eq!(spec.walltime_hms(), "01:30:00");
        assert!(spec.spill_to_disk);
    }

    #[test]
    fn rejects_zero_fields() {
        let spec = ResourceSpec::default().with_cores(0);
        match spec.validate() {
            Err(crate::GsError::Pool(PoolError::MalformedSpec { message })) => {
                assert!(message.contains("cores_per_worker"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(ResourceSpec::default().with_memory_mb(0).validate().is_err());
        assert!(ResourceSpec::new("  ").validate().is_err());
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = ResourceSpec::new("sweep").with_target_allocations(2);
        let json = serde_json::to_string(&spec).unwrap();
        let back: ResourceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
