//! # gs-pool
//!
//! Elastic worker pool provisioning over a batch scheduler.
//!
//! The scheduler itself is opaque behind the [`BatchScheduler`] trait: the
//! [`SlurmScheduler`] renders and submits batch job scripts, while the
//! [`InProcessCluster`] runs workers as tasks in the current process for
//! demos and tests. Pool membership changes are published as a
//! [`PoolEvent`] stream, never polled.

mod local;
mod provisioner;
mod scheduler;
mod slurm;

pub use local::InProcessCluster;
pub use provisioner::{ExecutionContext, PoolHandle, Provisioner};
pub use scheduler::{
    AllocationRequest, BatchScheduler, JobId, PoolEvent, PoolState, TaskCompletion, TaskEnvelope,
    TaskRunner, WorkerChannel, WorkerId, WorkerRequest,
};
pub use slurm::{CliOutput, SchedulerCli, SlurmScheduler, SystemCli};
