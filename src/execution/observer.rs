use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::registry::{DatasetId, OperationKind};

/// Execution events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        requests: usize,
        datasets: usize,
    },
    ThrottleWaited {
        duration: Duration,
    },
    GroupStarted {
        dataset: DatasetId,
        operations: usize,
    },
    OperationFinished {
        dataset: DatasetId,
        kind: OperationKind,
        /// Row count of the new table, or the error message.
        outcome: Result<usize, String>,
    },
    GroupFinished {
        dataset: DatasetId,
    },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Forwards execution events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { requests, datasets } => {
                tracing::info!(requests, datasets, "batch started");
            }
            ExecutionEvent::ThrottleWaited { duration } => {
                tracing::debug!(?duration, "waited for a batch slot");
            }
            ExecutionEvent::GroupStarted { dataset, operations } => {
                tracing::debug!(%dataset, operations, "dataset group started");
            }
            ExecutionEvent::OperationFinished {
                dataset,
                kind,
                outcome: Ok(rows),
            } => tracing::debug!(%dataset, operation = %kind, rows, "operation finished"),
            ExecutionEvent::OperationFinished {
                dataset,
                kind,
                outcome: Err(error),
            } => tracing::warn!(%dataset, operation = %kind, %error, "operation failed"),
            ExecutionEvent::GroupFinished { dataset } => {
                tracing::debug!(%dataset, "dataset group finished");
            }
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                tracing::info!(?elapsed, %metrics, "batch finished");
            }
        }
    }
}

/// Real-time metrics for a batch run.
///
/// The engine updates these counters during execution; callers can snapshot them at any time.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    operations_succeeded: AtomicU64,
    operations_failed: AtomicU64,
    groups_started: AtomicU64,
    groups_finished: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_groups: AtomicUsize,
    max_active_groups: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_run(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
        for counter in [
            &self.elapsed_ns,
            &self.operations_succeeded,
            &self.operations_failed,
            &self.groups_started,
            &self.groups_finished,
            &self.throttle_wait_ns,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.active_groups.store(0, Ordering::SeqCst);
        self.max_active_groups.store(0, Ordering::SeqCst);
    }

    pub(crate) fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(saturating_nanos(elapsed), Ordering::SeqCst);
    }

    pub(crate) fn on_operation(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.operations_succeeded
        } else {
            &self.operations_failed
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_group_start(&self) {
        self.groups_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_groups.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_groups.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn on_group_end(&self) {
        self.groups_finished.fetch_add(1, Ordering::SeqCst);
        self.active_groups.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn on_throttle_wait(&self, d: Duration) {
        self.throttle_wait_ns.fetch_add(saturating_nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            operations_succeeded: self.operations_succeeded.load(Ordering::SeqCst),
            operations_failed: self.operations_failed.load(Ordering::SeqCst),
            groups_started: self.groups_started.load(Ordering::SeqCst),
            groups_finished: self.groups_finished.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_groups: self.max_active_groups.load(Ordering::SeqCst),
        }
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    /// Wall time of the last finished batch.
    pub elapsed: Option<Duration>,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    /// Per-dataset groups; one group runs its operations in submission order.
    pub groups_started: u64,
    pub groups_finished: u64,
    /// Total time groups spent waiting for an in-flight slot.
    pub throttle_wait: Duration,
    pub max_active_groups: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, operations={} ok/{} failed, groups={}/{}, max_active_groups={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.operations_succeeded,
            self.operations_failed,
            self.groups_finished,
            self.groups_started,
            self.max_active_groups,
            self.throttle_wait,
            self.elapsed
        )
    }
}
