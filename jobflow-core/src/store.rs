use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Gateway to the durable job store.
///
/// The scheduler operates exclusively through this trait, enabling pluggable
/// backends ([`MemoryJobStore`](crate::store_memory::MemoryJobStore) for
/// tests and embedded use, a relational store in production). Every method is
/// assumed transactional and safe for concurrent callers: competing acquirers
/// surface as [`LockOutcome::Conflict`], never as an error.
#[async_trait]
pub trait JobStore: Send + Sync {
    // ── Acquisition ──

    /// Up to `limit` acquirable jobs, ordered per `order` and filtered by
    /// `range` (whenever either bound is set). Safe to call inside a
    /// transaction that will later lock a subset of the results.
    async fn find_next_jobs_to_execute(
        &self,
        limit: usize,
        order: &OrderPolicy,
        range: &PriorityRange,
    ) -> Result<Vec<Job>>;

    /// Exclusive jobs in `scope_id` that are currently locked (claimed by
    /// some acquisition round). With `across_hierarchy` the scope is the
    /// root process instance tree, otherwise the single process instance.
    /// Used to detect another still-running acquisition round on the same
    /// scope, whether it belongs to a competing node or to this node's own
    /// earlier cycle.
    async fn find_exclusive_jobs(&self, scope_id: Uuid, across_hierarchy: bool)
        -> Result<Vec<Job>>;

    /// Optimistic lock: claims the job for `owner` until `expires_at` iff its
    /// revision still equals `expected_revision`.
    async fn lock_job(
        &self,
        id: JobId,
        owner: &str,
        expires_at: Timestamp,
        expected_revision: u64,
    ) -> Result<LockOutcome>;

    /// Lock one acquisition round's survivors, returning an outcome per
    /// `(id, expected_revision)` request in order. Implementations over a
    /// transactional backend must commit the whole round atomically:
    /// interleaving two rounds' individual locks could hand parts of one
    /// exclusivity scope to two acquirers. The default forwards to
    /// [`lock_job`](Self::lock_job) and is only suitable for stores whose
    /// callers never overlap.
    async fn lock_jobs(
        &self,
        requests: &[(JobId, u64)],
        owner: &str,
        expires_at: Timestamp,
    ) -> Result<Vec<LockOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for &(id, expected_revision) in requests {
            outcomes.push(self.lock_job(id, owner, expires_at, expected_revision).await?);
        }
        Ok(outcomes)
    }

    // ── Execution / cleanup ──

    async fn find_job_by_id(&self, id: JobId) -> Result<Option<Job>>;

    async fn find_jobs_by_process_instance(&self, process_instance_id: Uuid) -> Result<Vec<Job>>;

    async fn delete_job(&self, id: JobId) -> Result<()>;

    /// The single retry mutation the dispatcher is allowed: decrement the
    /// retry count and release the lock so the job becomes acquirable again.
    /// Returns the remaining retries; zero means the job must be escalated.
    async fn decrement_retries(&self, id: JobId) -> Result<u32>;
}
