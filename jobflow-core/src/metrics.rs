use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observability counters for the executor. Monotonic, read via
/// [`snapshot`](ExecutorMetrics::snapshot) for periodic logging; never
/// behavior-affecting.
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    jobs_acquired: AtomicU64,
    lock_conflicts: AtomicU64,
    batches_rejected: AtomicU64,
    jobs_executed: AtomicU64,
    execution_failures: AtomicU64,
    incidents: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_acquired: u64,
    pub lock_conflicts: u64,
    pub batches_rejected: u64,
    pub jobs_executed: u64,
    pub execution_failures: u64,
    pub incidents: u64,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_jobs_acquired(&self, count: u64) {
        self.jobs_acquired.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_conflicts(&self, count: u64) {
        self.lock_conflicts.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_job_executed(&self) {
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_execution_failure(&self) {
        self.execution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_incident(&self) {
        self.incidents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_acquired: self.jobs_acquired.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            incidents: self.incidents.load(Ordering::Relaxed),
        }
    }
}
