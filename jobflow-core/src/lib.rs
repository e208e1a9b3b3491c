//! Job acquisition and execution scheduling for a persistent workflow engine.
//!
//! Jobs (timers, async continuations, batch steps) sit in a shared durable
//! store contended by any number of worker processes. This crate turns them
//! into safely, exclusively and fairly executed work without a central
//! coordinator:
//!
//! - [`AcquireJobsCmd`] selects candidates, groups them into batches by
//!   exclusivity scope and claims them through the store's optimistic lock;
//! - [`BackoffStrategy`] paces the loop, trading latency against wasted work
//!   under idleness, lock contention and pool saturation;
//! - [`JobExecutor`] is the acquisition heartbeat, [`Dispatcher`] the bounded
//!   pool that runs each batch strictly sequentially;
//! - [`PriorityRange`] statically partitions the queue between nodes that
//!   never talk to each other.
//!
//! The durable store stays behind the [`JobStore`] trait; what a job *does*
//! stays behind [`JobHandler`]. All cross-process coordination rests on the
//! store's transaction isolation plus the revision-based optimistic check.

pub mod acquisition;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod metrics;
pub mod store;
pub mod store_memory;
pub mod strategy;
pub mod types;

pub use acquisition::AcquireJobsCmd;
pub use config::{BackoffConfig, JobExecutorConfig, PoolConfig, ShutdownMode};
pub use context::{AcquiredJobs, AcquisitionContext};
pub use dispatcher::{BatchRejected, BatchSubmission, Dispatcher, JobHandler};
pub use executor::{ExecutorHandle, JobExecutor};
pub use metrics::{ExecutorMetrics, MetricsSnapshot};
pub use store::JobStore;
pub use store_memory::MemoryJobStore;
pub use strategy::{AcquisitionStrategy, BackoffStrategy, WaitReason};
pub use types::{Job, JobId, JobKind, LockOutcome, OrderPolicy, PriorityRange, SuspensionState, Timestamp};
