//! Demonstration: grid-search tuning of a classifier over an elastic,
//! batch-scheduled worker pool.
//!
//! Loads a synthetic dataset, fits a baseline model, provisions an
//! in-process worker pool through the scheduler seam, redirects the sweep's
//! parallel map onto the pool, and reports timing and accuracy before and
//! after tuning.
//!
//! Environment overrides: `GRIDSPAN_WORKERS`, `GRIDSPAN_FOLDS`,
//! `GRIDSPAN_SEED`, and `RUST_LOG` for log filtering.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use gs_backend::{Backend, BackendSwitch, LocalBackend, PoolBackend, RetryPolicy};
use gs_pool::{InProcessCluster, Provisioner, TaskRunner};
use gs_search::ParamGrid;
use gs_tune::{EvalRunner, GridSearchDriver, KnnClassifier, KnnEvaluator, SweepConfig};
use gs_types::{Dataset, GsResult, ResourceSpec};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Synthetic classification data: one noisy cluster per class, features
/// already in [0, 1].
fn synthetic_blobs(
    per_class: usize,
    classes: usize,
    n_features: usize,
    spread: f64,
    seed: u64,
) -> GsResult<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let centers: Vec<Vec<f64>> = (0..classes)
        .map(|_| (0..n_features).map(|_| rng.gen_range(0.2..0.8)).collect())
        .collect();

    let mut features = Vec::with_capacity(per_class * classes);
    let mut labels = Vec::with_capacity(per_class * classes);
    for (class, center) in centers.iter().enumerate() {
        for _ in 0..per_class {
            let point: Vec<f64> = center
                .iter()
                .map(|&c| (c + rng.gen_range(-spread..spread)).clamp(0.0, 1.0))
                .collect();
            features.push(point);
            labels.push(class as u32);
        }
    }

    Dataset::new(features, labels)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let workers: usize = env_or("GRIDSPAN_WORKERS", 4);
    let folds: usize = env_or("GRIDSPAN_FOLDS", 3);
    let seed: u64 = env_or("GRIDSPAN_SEED", 17);

    // Dataset and hold-out split.
    let data = synthetic_blobs(120, 3, 4, 0.25, seed)?;
    let (train, test) = data.train_test_split(0.25, seed)?;
    let train = Arc::new(train);
    let train_rows: Vec<usize> = (0..train.len()).collect();
    let test_rows: Vec<usize> = (0..test.len()).collect();
    info!(
        rows = data.len(),
        train = train.len(),
        test = test.len(),
        "dataset ready"
    );

    // Baseline fit with default hyper-parameters.
    let baseline_started = Instant::now();
    let baseline = KnnClassifier::new(5, 2.0)?.fit(train.view(&train_rows))?;
    let baseline_accuracy = baseline.accuracy(test.view(&test_rows));
    info!(
        accuracy = baseline_accuracy,
        elapsed_ms = baseline_started.elapsed().as_millis() as u64,
        "baseline model fitted"
    );

    // The search space.
    let grid = ParamGrid::new()
        .add_ints("n_neighbors", vec![1, 3, 5, 7, 9])
        .add_floats("distance_power", vec![1.0, 2.0]);

    // Worker pool: the in-process cluster stands in for a batch scheduler;
    // swap in a SlurmScheduler to run the same flow on real allocations.
    let runner: Arc<dyn TaskRunner> = Arc::new(EvalRunner::new(Arc::new(KnnEvaluator)));
    let cluster = Arc::new(
        InProcessCluster::new(Arc::clone(&runner))
            .with_admission_delay(Duration::from_millis(50)),
    );
    let provisioner = Provisioner::new(cluster);

    let spec = ResourceSpec::new("gridspan-demo")
        .with_cores(1)
        .with_memory_mb(1024)
        .with_walltime_minutes(15)
        .with_target_allocations(2);
    let pool = provisioner.provision(spec).await?;
    pool.scale(workers).await?;

    let context = pool.connect(Duration::from_secs(30)).await?;
    info!(workers = context.state().worker_count(), "pool connected");

    // Distributed sweep through the backend switch.
    let switch = BackendSwitch::new(Arc::new(Backend::Local(LocalBackend::new(Arc::clone(
        &runner,
    )))));
    let backend = Arc::new(Backend::Pool(
        PoolBackend::new(context)
            .with_retry_policy(RetryPolicy { max_retries: 2 })
            .with_deadline(Duration::from_secs(300)),
    ));

    let driver = GridSearchDriver::new(
        SweepConfig::new(grid)
            .with_folds(folds)
            .with_fold_seed(seed),
    );
    let report = driver.run(&train, &switch, backend, Some(&pool)).await?;

    info!(
        best = %report.best.candidate,
        mean_cv_score = report.best.mean_score,
        tasks = report.tasks_executed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "sweep finished"
    );

    // Refit with the winning configuration and score on the hold-out set.
    let tuned_started = Instant::now();
    let tuned = KnnClassifier::from_params(&report.best.candidate)?.fit(train.view(&train_rows))?;
    let tuned_accuracy = tuned.accuracy(test.view(&test_rows));
    info!(
        baseline_accuracy,
        tuned_accuracy,
        refit_ms = tuned_started.elapsed().as_millis() as u64,
        "before/after comparison"
    );

    pool.release().await?;
    Ok(())
}
