use crate::types::{OrderPolicy, PriorityRange};
use std::time::Duration;

/// Tuning for the backoff acquisition strategy.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Upper bound on jobs requested per engine per cycle.
    pub max_jobs_per_acquisition: usize,
    /// Lower bound after rejection throttling; never drops to zero.
    pub min_jobs_per_acquisition: usize,
    pub base_idle_wait: Duration,
    pub idle_increase_factor: f64,
    pub max_idle_wait: Duration,
    pub base_backoff_wait: Duration,
    pub backoff_increase_factor: f64,
    pub max_backoff_wait: Duration,
    /// Consecutive conflict-free cycles before the backoff level decreases.
    pub backoff_decrease_threshold: u32,
    /// Fixed wait applied when every batch of a cycle was rejected by the
    /// execution pool. Not escalated: "no capacity" is not contention.
    pub execution_saturation_wait: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_jobs_per_acquisition: 3,
            min_jobs_per_acquisition: 1,
            base_idle_wait: Duration::from_millis(50),
            idle_increase_factor: 2.0,
            max_idle_wait: Duration::from_secs(60),
            base_backoff_wait: Duration::from_millis(50),
            backoff_increase_factor: 2.0,
            max_backoff_wait: Duration::from_secs(60),
            backoff_decrease_threshold: 100,
            execution_saturation_wait: Duration::from_millis(100),
        }
    }
}

/// Execution pool sizing. `core_workers` long-lived workers drain the queue;
/// when the queue is full, transient overflow workers are spawned up to
/// `max_workers`; past that, submissions are rejected.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 3,
            max_workers: 10,
            queue_capacity: 3,
        }
    }
}

/// How the executor winds down in-flight work on stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for every dispatched batch to finish.
    Graceful,
    /// Return immediately; dispatched batches keep running detached, and
    /// locks of never-executed jobs simply expire.
    Immediate,
}

/// The full operator-facing configuration surface of the job executor.
#[derive(Clone, Debug)]
pub struct JobExecutorConfig {
    /// Stable identity used as lock owner. Generated per executor when unset.
    pub lock_owner: Option<String>,
    /// How long an acquired lock is held before it expires on its own.
    pub lock_duration: Duration,
    pub order: OrderPolicy,
    /// Static priority partition for this node. Applies whenever a bound is
    /// set, independent of `order.acquire_by_priority`.
    pub priority_range: PriorityRange,
    /// Scope exclusive jobs by the root process instance tree instead of the
    /// single process instance.
    pub acquire_exclusive_over_process_hierarchies: bool,
    pub backoff: BackoffConfig,
    pub pool: PoolConfig,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            lock_owner: None,
            lock_duration: Duration::from_secs(5 * 60),
            order: OrderPolicy::default(),
            priority_range: PriorityRange::UNBOUNDED,
            acquire_exclusive_over_process_hierarchies: false,
            backoff: BackoffConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}
