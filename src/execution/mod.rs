//! Batch execution of registry operations with configurable parallelism.
//!
//! This module sits "above" [`crate::registry`] and provides:
//!
//! - Parallel execution across independent datasets; requests for the same dataset run one
//!   after another, in submission order
//! - Resource limits / throttling (datasets in flight)
//! - Real-time metrics + observer hooks for monitoring

mod observer;
mod semaphore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::error::TransformResult;
use crate::registry::{Applied, DatasetId, DatasetRegistry, Operation};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, TracingExecutionObserver,
};

use semaphore::Semaphore;

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of worker threads used by the engine.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on datasets being worked on at the same time.
    ///
    /// This is an additional throttle on top of `num_threads`. Zero is treated as one.
    pub max_in_flight: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: Some(n),
            max_in_flight: n,
        }
    }
}

/// One operation to run against one registered dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Target dataset.
    pub dataset: DatasetId,
    /// What to apply to it.
    pub operation: Operation,
}

impl OperationRequest {
    pub fn new(dataset: DatasetId, operation: Operation) -> Self {
        Self { dataset, operation }
    }

    /// Build a request from a string-keyed operation; see [`Operation::from_config`].
    pub fn from_config(dataset: DatasetId, kind: &str, params: serde_json::Value) -> TransformResult<Self> {
        Ok(Self::new(dataset, Operation::from_config(kind, params)?))
    }
}

/// Runs batches of [`OperationRequest`]s against a [`DatasetRegistry`].
pub struct ExecutionEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("threads", &self.pool.current_num_threads())
            .field("opts", &self.opts)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    pub fn new(opts: ExecutionOptions) -> Result<Self, ThreadPoolBuildError> {
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("tabular-exec-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Apply every request and return one result per request, in submission order.
    ///
    /// Requests are grouped by dataset. Groups run in parallel (at most
    /// [`ExecutionOptions::max_in_flight`] at a time); within a group, requests run in
    /// submission order, each seeing the table left by the one before. A failed request leaves
    /// its dataset unchanged and does not stop later requests.
    pub fn apply_batch(
        &self,
        registry: &DatasetRegistry,
        requests: Vec<OperationRequest>,
    ) -> Vec<TransformResult<Applied>> {
        let start = Instant::now();
        let total = requests.len();
        let groups = group_by_dataset(requests);

        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            requests: total,
            datasets: groups.len(),
        });

        let sem = Semaphore::new(self.opts.max_in_flight);
        let per_group: Vec<Vec<(usize, TransformResult<Applied>)>> = self.pool.install(|| {
            groups
                .into_par_iter()
                .map(|(dataset, ops)| self.run_group(registry, &sem, dataset, ops))
                .collect()
        });

        let mut indexed: Vec<(usize, TransformResult<Applied>)> = per_group.into_iter().flatten().collect();
        indexed.sort_by_key(|(idx, _)| *idx);

        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });

        indexed.into_iter().map(|(_, result)| result).collect()
    }

    fn run_group(
        &self,
        registry: &DatasetRegistry,
        sem: &Semaphore,
        dataset: DatasetId,
        ops: Vec<(usize, Operation)>,
    ) -> Vec<(usize, TransformResult<Applied>)> {
        let (_permit, waited) = sem.acquire();
        if waited > Duration::ZERO {
            self.metrics.on_throttle_wait(waited);
            self.emit(ExecutionEvent::ThrottleWaited { duration: waited });
        }

        self.metrics.on_group_start();
        self.emit(ExecutionEvent::GroupStarted {
            dataset,
            operations: ops.len(),
        });

        let out = ops
            .into_iter()
            .map(|(idx, operation)| {
                let result = registry.apply_operation(dataset, &operation);
                self.metrics.on_operation(result.is_ok());
                self.emit(ExecutionEvent::OperationFinished {
                    dataset,
                    kind: operation.kind(),
                    outcome: result
                        .as_ref()
                        .map(|applied| applied.table.row_count())
                        .map_err(ToString::to_string),
                });
                (idx, result)
            })
            .collect();

        self.emit(ExecutionEvent::GroupFinished { dataset });
        self.metrics.on_group_end();
        out
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Split requests into per-dataset groups, keeping submission order inside each group and
/// first-seen order between groups.
fn group_by_dataset(requests: Vec<OperationRequest>) -> Vec<(DatasetId, Vec<(usize, Operation)>)> {
    let mut slots: HashMap<DatasetId, usize> = HashMap::new();
    let mut groups: Vec<(DatasetId, Vec<(usize, Operation)>)> = Vec::new();
    for (idx, req) in requests.into_iter().enumerate() {
        let slot = *slots.entry(req.dataset).or_insert_with(|| {
            groups.push((req.dataset, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push((idx, req.operation));
    }
    groups
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::{ExecutionEngine, ExecutionOptions, OperationRequest};
    use crate::error::TransformError;
    use crate::execution::{ExecutionEvent, ExecutionObserver};
    use crate::registry::{DatasetId, DatasetRegistry};
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn dataset_of_n(n: usize) -> DataSet {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64)]);
        let rows = (0..n as i64).map(|i| vec![Value::Int64(i)]).collect();
        DataSet::new(schema, rows)
    }

    fn add_one(id: DatasetId) -> OperationRequest {
        OperationRequest::from_config(
            id,
            "transform",
            json!({"id": {"type": "math", "params": {"operation": "add", "value": 1}}}),
        )
        .unwrap()
    }

    struct ConcurrencyObserver {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ExecutionObserver for ConcurrencyObserver {
        fn on_event(&self, event: &ExecutionEvent) {
            match event {
                ExecutionEvent::GroupStarted { .. } => {
                    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                    self.max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                ExecutionEvent::GroupFinished { .. } => {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn requests_for_one_dataset_run_in_order() {
        let reg = DatasetRegistry::new();
        let id = reg.register("ids", dataset_of_n(3));
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight: 4,
        })
        .unwrap();

        let requests = vec![
            add_one(id),
            OperationRequest::from_config(id, "filter", json!([{"column": "id", "operator": "gt", "value": 1}]))
                .unwrap(),
            add_one(id),
        ];
        let results = engine.apply_batch(&reg, requests);
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].as_ref().unwrap().table.row_count(), 2);
        assert_eq!(
            reg.table(id).unwrap().rows,
            vec![vec![Value::Int64(3)], vec![Value::Int64(4)]]
        );
        assert_eq!(reg.lineage(id).unwrap().len(), 3);
    }

    #[test]
    fn failures_are_reported_per_request() {
        let reg = DatasetRegistry::new();
        let id = reg.register("ids", dataset_of_n(2));
        let engine = ExecutionEngine::new(ExecutionOptions::default()).unwrap();
        let metrics = engine.metrics();

        let requests = vec![
            OperationRequest::from_config(id, "sort", json!({"by": "missing"})).unwrap(),
            add_one(id),
        ];
        let results = engine.apply_batch(&reg, requests);
        assert!(matches!(results[0], Err(TransformError::Schema { .. })));
        assert!(results[1].is_ok());

        let snap = metrics.snapshot();
        assert_eq!(snap.operations_failed, 1);
        assert_eq!(snap.operations_succeeded, 1);
        assert_eq!(snap.groups_finished, 1);
        assert!(snap.elapsed.is_some());
    }

    #[test]
    fn max_in_flight_throttles_dataset_groups() {
        let reg = DatasetRegistry::new();
        let ids: Vec<_> = (0..12).map(|i| reg.register(format!("d{i}"), dataset_of_n(5))).collect();
        let observer = Arc::new(ConcurrencyObserver {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight: 1,
        })
        .unwrap()
        .with_observer(observer.clone());

        let requests = ids.iter().map(|id| add_one(*id)).collect();
        let results = engine.apply_batch(&reg, requests);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(observer.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(engine.metrics().snapshot().max_active_groups, 1);
    }

    #[test]
    fn independent_datasets_run_concurrently() {
        let reg = DatasetRegistry::new();
        let ids: Vec<_> = (0..16).map(|i| reg.register(format!("d{i}"), dataset_of_n(5))).collect();
        let observer = Arc::new(ConcurrencyObserver {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight: 4,
        })
        .unwrap()
        .with_observer(observer.clone());

        let requests = ids.iter().map(|id| add_one(*id)).collect();
        engine.apply_batch(&reg, requests);
        assert!(observer.max_active.load(Ordering::SeqCst) > 1);
        for id in ids {
            assert_eq!(reg.table(id).unwrap().rows[0][0], Value::Int64(1));
        }
    }
}
