//! Default local execution: the task batch runs on the rayon thread pool.

use dashmap::DashMap;
use std::sync::Arc;

use gs_pool::{TaskEnvelope, TaskRunner};
use gs_types::{Dataset, DataError, DatasetKey, ExecError, GsError, GsResult};

/// Executes task batches in-process.
///
/// Cheap to clone; clones share the runner and the registered-data store.
#[derive(Clone)]
pub struct LocalBackend {
    runner: Arc<dyn TaskRunner>,
    store: Arc<DashMap<DatasetKey, Arc<Dataset>>>,
}

impl LocalBackend {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            runner,
            store: Arc::new(DashMap::new()),
        }
    }

    /// Local counterpart of a pool broadcast: register data under a key
    /// that task envelopes can reference.
    pub fn register(&self, data: Arc<Dataset>) -> DatasetKey {
        let key = DatasetKey::generate();
        self.store.insert(key, data);
        key
    }

    /// Run every task, in parallel, returning results in input order.
    pub fn run(&self, tasks: &[TaskEnvelope]) -> GsResult<Vec<serde_json::Value>> {
        use rayon::prelude::*;

        tasks
            .par_iter()
            .enumerate()
            .map(|(index, task)| {
                let data = match task.data {
                    Some(key) => Some(self.store.get(&key).map(|e| Arc::clone(e.value())).ok_or(
                        DataError::UnknownBroadcast {
                            key: key.to_string(),
                        },
                    )?),
                    None => None,
                };

                self.runner
                    .run(&task.payload, data.as_deref())
                    .map_err(|err| {
                        GsError::from(ExecError::TaskFailed {
                            task_index: index,
                            message: err.to_string(),
                        })
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct SquareRunner;

    impl TaskRunner for SquareRunner {
        fn run(
            &self,
            payload: &serde_json::Value,
            data: Option<&Dataset>,
        ) -> GsResult<serde_json::Value> {
            if let Some(dataset) = data {
                return Ok(json!(dataset.len()));
            }
            let x = payload["x"].as_i64().ok_or_else(|| {
                gs_types::validation_error!("payload missing x")
            })?;
            Ok(json!(x * x))
        }
    }

    fn envelope(seq: usize, payload: serde_json::Value) -> TaskEnvelope {
        TaskEnvelope {
            id: Uuid::new_v4(),
            seq,
            payload,
            data: None,
        }
    }

    #[test]
    fn results_match_input_order() {
        let backend = LocalBackend::new(Arc::new(SquareRunner));
        let tasks: Vec<_> = (0..32).map(|i| envelope(i, json!({"x": i}))).collect();

        let results = backend.run(&tasks).unwrap();
        for (i, value) in results.iter().enumerate() {
            assert_eq!(value.as_i64().unwrap(), (i * i) as i64);
        }
    }

    #[test]
    fn registered_data_is_visible_to_tasks() {
        let backend = LocalBackend::new(Arc::new(SquareRunner));
        let dataset = Arc::new(
            Dataset::new(vec![vec![0.0], vec![1.0], vec![2.0]], vec![0, 1, 0]).unwrap(),
        );
        let key = backend.register(dataset);

        let mut task = envelope(0, json!({}));
        task.data = Some(key);

        let results = backend.run(&[task]).unwrap();
        assert_eq!(results[0].as_u64().unwrap(), 3);
    }

    #[test]
    fn unknown_broadcast_key_fails() {
        let backend = LocalBackend::new(Arc::new(SquareRunner));
        let mut task = envelope(0, json!({}));
        task.data = Some(DatasetKey::generate());

        assert!(matches!(
            backend.run(&[task]),
            Err(GsError::Data(DataError::UnknownBroadcast { .. }))
        ));
    }

    #[test]
    fn task_error_names_the_task() {
        let backend = LocalBackend::new(Arc::new(SquareRunner));
        let tasks = vec![
            envelope(0, json!({"x": 1})),
            envelope(1, json!({"wrong": true})),
        ];

        match backend.run(&tasks) {
            Err(GsError::Exec(ExecError::TaskFailed { task_index, .. })) => {
                assert_eq!(task_index, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
