//! SLURM-backed scheduler: renders batch scripts from a [`ResourceSpec`]
//! and drives `sbatch`/`scancel` through a stubbable command transport.
//!
//! Remote workers started by these scripts dial back into the deployment's
//! connection acceptor, which feeds the shared [`PoolState`]; this module
//! only owns submission, scaling, and cancellation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use gs_types::{GsResult, PoolError, ResourceSpec};

use crate::scheduler::{AllocationRequest, BatchScheduler, JobId, PoolState};

/// Captured output of one scheduler CLI invocation.
#[derive(Debug, Clone)]
pub struct CliOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Transport used to invoke scheduler commands. Stubbed in tests.
#[async_trait]
pub trait SchedulerCli: Send + Sync {
    async fn run(&self, program: &str, args: &[String], stdin: Option<String>) -> GsResult<CliOutput>;
}

/// Runs scheduler commands as real subprocesses.
#[derive(Debug, Default)]
pub struct SystemCli;

#[async_trait]
impl SchedulerCli for SystemCli {
    async fn run(&self, program: &str, args: &[String], stdin: Option<String>) -> GsResult<CliOutput> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let Some(script) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(script.as_bytes()).await?;
            }
        }

        let output = child.wait_with_output().await?;
        Ok(CliOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Render the batch script for one worker allocation.
///
/// One allocation starts `workers_per_allocation` worker processes sharing
/// the allocation's resource envelope. The `--no-spill` flag enforces the
/// fail-fast memory policy.
pub fn render_batch_script(spec: &ResourceSpec, worker_command: &str) -> String {
    let mut script = String::new();
    script.push_str("#!/usr/bin/env bash\n");
    script.push_str(&format!("#SBATCH -J {}\n", spec.job_name));
    script.push_str("#SBATCH -n 1\n");
    script.push_str(&format!(
        "#SBATCH --cpus-per-task={}\n",
        spec.cores_per_worker * spec.workers_per_allocation
    ));
    script.push_str(&format!(
        "#SBATCH --mem={}M\n",
        spec.memory_mb * spec.workers_per_allocation as u64
    ));
    script.push_str(&format!("#SBATCH -t {}\n", spec.walltime_hms()));
    script.push_str(&format!(
        "#SBATCH -o {}/{}-%J.out\n",
        spec.log_dir.display(),
        spec.job_name
    ));
    script.push_str(&format!(
        "#SBATCH -e {}/{}-%J.err\n",
        spec.log_dir.display(),
        spec.job_name
    ));
    script.push('\n');

    script.push_str(&format!(
        "{} --job {} --nworkers {} --nthreads {} --memory-limit {}M --local-directory {}",
        worker_command,
        spec.job_name,
        spec.workers_per_allocation,
        spec.cores_per_worker,
        spec.memory_mb,
        spec.spill_dir.display()
    ));
    if !spec.spill_to_disk {
        script.push_str(" --no-spill");
    }
    script.push('\n');
    script
}

#[derive(Debug)]
struct SlurmJob {
    spec: ResourceSpec,
    /// Scheduler ids of the individual allocations, in submission order.
    allocations: Vec<String>,
}

/// [`BatchScheduler`] implementation submitting scalable worker jobs to
/// SLURM. `scale` converges by submitting or cancelling whole allocations.
pub struct SlurmScheduler<C: SchedulerCli> {
    cli: C,
    worker_command: String,
    jobs: Mutex<HashMap<JobId, SlurmJob>>,
}

impl<C: SchedulerCli> SlurmScheduler<C> {
    pub fn new(cli: C) -> Self {
        Self {
            cli,
            worker_command: "gridspan-worker".to_string(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_worker_command(mut self, command: impl Into<String>) -> Self {
        self.worker_command = command.into();
        self
    }

    async fn submit_allocation(&self, spec: &ResourceSpec) -> GsResult<String> {
        let script = render_batch_script(spec, &self.worker_command);
        let output = self.cli.run("sbatch", &[], Some(script)).await?;

        if !output.success() {
            return Err(PoolError::SubmissionRejected {
                reason: output.stderr.trim().to_string(),
            }
            .into());
        }

        // sbatch prints "Submitted batch job <id>".
        let id = output
            .stdout
            .split_whitespace()
            .last()
            .filter(|token| token.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| PoolError::Scheduler {
                message: format!("could not parse sbatch output: {:?}", output.stdout.trim()),
            })?;
        Ok(id.to_string())
    }

    async fn cancel_allocation(&self, allocation: &str) -> GsResult<()> {
        let output = self.cli.run("scancel", &[allocation.to_string()], None).await?;
        if !output.success() {
            return Err(PoolError::Scheduler {
                message: format!("scancel {allocation} failed: {}", output.stderr.trim()),
            }
            .into());
        }
        Ok(())
    }

    fn allocations_for(spec: &ResourceSpec, workers: usize) -> usize {
        workers.div_ceil(spec.workers_per_allocation)
    }
}

#[async_trait]
impl<C: SchedulerCli> BatchScheduler for SlurmScheduler<C> {
    async fn submit(&self, request: &AllocationRequest, _state: Arc<PoolState>) -> GsResult<JobId> {
        let wanted = Self::allocations_for(&request.spec, request.workers);
        let mut allocations = Vec::with_capacity(wanted);

        for _ in 0..wanted {
            match self.submit_allocation(&request.spec).await {
                Ok(id) => allocations.push(id),
                Err(err) => {
                    // Best-effort cleanup of the allocations we already hold;
                    // the rejection itself is surfaced unchanged.
                    for allocation in &allocations {
                        if let Err(cancel_err) = self.cancel_allocation(allocation).await {
                            warn!(%allocation, error = %cancel_err, "cleanup cancel failed");
                        }
                    }
                    return Err(err);
                }
            }
        }

        let job = JobId::generate();
        info!(%job, allocations = allocations.len(), "submitted worker job");
        self.jobs.lock().await.insert(
            job.clone(),
            SlurmJob {
                spec: request.spec.clone(),
                allocations,
            },
        );
        Ok(job)
    }

    async fn set_worker_target(&self, job: &JobId, workers: usize) -> GsResult<()> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.get_mut(job).ok_or_else(|| PoolError::JobNotFound {
            job_id: job.to_string(),
        })?;

        let wanted = Self::allocations_for(&entry.spec, workers);
        let current = entry.allocations.len();

        if wanted > current {
            for _ in current..wanted {
                let id = self.submit_allocation(&entry.spec).await?;
                entry.allocations.push(id);
            }
        } else {
            while entry.allocations.len() > wanted {
                if let Some(allocation) = entry.allocations.pop() {
                    self.cancel_allocation(&allocation).await?;
                }
            }
        }

        info!(%job, workers, allocations = entry.allocations.len(), "scaled worker job");
        Ok(())
    }

    async fn cancel(&self, job: &JobId) -> GsResult<()> {
        let removed = self.jobs.lock().await.remove(job);
        let entry = removed.ok_or_else(|| PoolError::JobNotFound {
            job_id: job.to_string(),
        })?;

        for allocation in &entry.allocations {
            self.cancel_allocation(allocation).await?;
        }
        info!(%job, "cancelled worker job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubCli {
        calls: SyncMutex<Vec<(String, Vec<String>)>>,
        next_id: AtomicUsize,
        reject_submissions: bool,
    }

    impl StubCli {
        fn rejecting() -> Self {
            Self {
                reject_submissions: true,
                ..Self::default()
            }
        }

        fn calls_to(&self, program: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|(p, _)| p == program)
                .count()
        }
    }

    #[async_trait]
    impl SchedulerCli for Arc<StubCli> {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _stdin: Option<String>,
        ) -> GsResult<CliOutput> {
            self.calls.lock().push((program.to_string(), args.to_vec()));
            if program == "sbatch" {
                if self.reject_submissions {
                    return Ok(CliOutput {
                        status: 1,
                        stdout: String::new(),
                        stderr: "sbatch: error: QOSMaxSubmitJobPerUserLimit".to_string(),
                    });
                }
                let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
                return Ok(CliOutput {
                    status: 0,
                    stdout: format!("Submitted batch job {id}\n"),
                    stderr: String::new(),
                });
            }
            Ok(CliOutput {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn spec() -> ResourceSpec {
        ResourceSpec::new("sweep")
            .with_cores(2)
            .with_memory_mb(4096)
            .with_walltime_minutes(30)
            .with_workers_per_allocation(2)
            .with_target_allocations(2)
    }

    #[test]
    fn script_carries_resource_directives() {
        let script = render_batch_script(&spec(), "gridspan-worker");

        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("#SBATCH -J sweep"));
        assert!(script.contains("#SBATCH --cpus-per-task=4"));
        assert!(script.contains("#SBATCH --mem=8192M"));
        assert!(script.contains("#SBATCH -t 00:30:00"));
        assert!(script.contains("--nworkers 2"));
        assert!(script.contains("--memory-limit 4096M"));
        // Fail-fast policy: spilling disabled by default.
        assert!(script.contains("--no-spill"));
    }

    #[test]
    fn spill_flag_follows_policy() {
        let script = render_batch_script(&spec().with_spill_to_disk(true), "gridspan-worker");
        assert!(!script.contains("--no-spill"));
    }

    #[tokio::test]
    async fn submit_creates_one_allocation_per_target() {
        let cli = Arc::new(StubCli::default());
        let scheduler = SlurmScheduler::new(Arc::clone(&cli));

        let request = AllocationRequest {
            spec: spec(),
            workers: 4,
        };
        scheduler.submit(&request, PoolState::new()).await.unwrap();

        // 4 workers at 2 per allocation -> 2 sbatch submissions.
        assert_eq!(cli.calls_to("sbatch"), 2);
    }

    #[tokio::test]
    async fn rejection_surfaces_immediately() {
        let cli = Arc::new(StubCli::rejecting());
        let scheduler = SlurmScheduler::new(Arc::clone(&cli));

        let request = AllocationRequest {
            spec: spec(),
            workers: 2,
        };
        match scheduler.submit(&request, PoolState::new()).await {
            Err(gs_types::GsError::Pool(PoolError::SubmissionRejected { reason })) => {
                assert!(reason.contains("QOSMaxSubmitJobPerUserLimit"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Exactly one attempt; no silent retry.
        assert_eq!(cli.calls_to("sbatch"), 1);
    }

    #[tokio::test]
    async fn scale_up_and_down_adjusts_allocations() {
        let cli = Arc::new(StubCli::default());
        let scheduler = SlurmScheduler::new(Arc::clone(&cli));

        let request = AllocationRequest {
            spec: spec(),
            workers: 2,
        };
        let job = scheduler.submit(&request, PoolState::new()).await.unwrap();
        assert_eq!(cli.calls_to("sbatch"), 1);

        scheduler.set_worker_target(&job, 6).await.unwrap();
        assert_eq!(cli.calls_to("sbatch"), 3);

        scheduler.set_worker_target(&job, 2).await.unwrap();
        assert_eq!(cli.calls_to("scancel"), 2);

        scheduler.cancel(&job).await.unwrap();
        assert_eq!(cli.calls_to("scancel"), 3);
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let cli = Arc::new(StubCli::default());
        let scheduler = SlurmScheduler::new(cli);

        let missing = JobId::new("nope");
        assert!(matches!(
            scheduler.set_worker_target(&missing, 1).await,
            Err(gs_types::GsError::Pool(PoolError::JobNotFound { .. }))
        ));
    }
}
