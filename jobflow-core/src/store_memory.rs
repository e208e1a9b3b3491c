use crate::store::JobStore;
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory [`JobStore`] backend.
///
/// Keys are v7 UUIDs, so the map's natural order is creation order — that is
/// the "stable store order" used when no ordering flag is enabled. The
/// revision-checked lock gives the same conflict semantics a relational
/// backend provides through `UPDATE ... WHERE revision = ?`.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a job, as the (out-of-scope) process runtime would.
    pub async fn insert(&self, job: Job) {
        self.jobs.lock().await.insert(job.id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

fn lock_in_place(
    jobs: &mut BTreeMap<JobId, Job>,
    id: JobId,
    owner: &str,
    expires_at: Timestamp,
    expected_revision: u64,
) -> LockOutcome {
    let Some(job) = jobs.get_mut(&id) else {
        // Deleted since selection — same as losing the race.
        return LockOutcome::Conflict;
    };
    if job.revision != expected_revision {
        return LockOutcome::Conflict;
    }
    job.lock_owner = Some(owner.to_string());
    job.lock_expiration = Some(expires_at);
    job.revision += 1;
    LockOutcome::Locked
}

/// Sort candidates per the ordering flags. Later passes are stable sorts, so
/// applying due date, then priority, then timer preference yields the
/// timer > priority > due-date precedence.
fn apply_order(candidates: &mut [Job], order: &OrderPolicy) {
    if order.acquire_by_due_date {
        // Missing due date sorts first: already due.
        candidates.sort_by_key(|j| j.due_date.unwrap_or(i64::MIN));
    }
    if order.acquire_by_priority {
        candidates.sort_by_key(|j| std::cmp::Reverse(j.priority));
    }
    if order.prefer_timer_jobs {
        candidates.sort_by_key(|j| j.kind != JobKind::Timer);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_next_jobs_to_execute(
        &self,
        limit: usize,
        order: &OrderPolicy,
        range: &PriorityRange,
    ) -> Result<Vec<Job>> {
        let now = now_ms();
        let jobs = self.jobs.lock().await;
        let mut candidates: Vec<Job> = jobs
            .values()
            .filter(|j| j.is_acquirable(now, range))
            .cloned()
            .collect();
        apply_order(&mut candidates, order);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn find_exclusive_jobs(
        &self,
        scope_id: Uuid,
        across_hierarchy: bool,
    ) -> Result<Vec<Job>> {
        let now = now_ms();
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| {
                let in_scope = if across_hierarchy {
                    j.root_process_instance_id == scope_id
                } else {
                    j.process_instance_id == scope_id
                };
                j.exclusive && in_scope && j.lock_owner.is_some() && !j.lock_expired(now)
            })
            .cloned()
            .collect())
    }

    async fn lock_job(
        &self,
        id: JobId,
        owner: &str,
        expires_at: Timestamp,
        expected_revision: u64,
    ) -> Result<LockOutcome> {
        let mut jobs = self.jobs.lock().await;
        Ok(lock_in_place(&mut jobs, id, owner, expires_at, expected_revision))
    }

    // One mutex hold for the whole round, the in-memory equivalent of a
    // relational store committing the round's locks in one transaction.
    async fn lock_jobs(
        &self,
        requests: &[(JobId, u64)],
        owner: &str,
        expires_at: Timestamp,
    ) -> Result<Vec<LockOutcome>> {
        let mut jobs = self.jobs.lock().await;
        Ok(requests
            .iter()
            .map(|&(id, revision)| lock_in_place(&mut jobs, id, owner, expires_at, revision))
            .collect())
    }

    async fn find_job_by_id(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_jobs_by_process_instance(&self, process_instance_id: Uuid) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.process_instance_id == process_instance_id)
            .cloned()
            .collect())
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        self.jobs.lock().await.remove(&id);
        Ok(())
    }

    async fn decrement_retries(&self, id: JobId) -> Result<u32> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(0);
        };
        job.retries = job.retries.saturating_sub(1);
        job.lock_owner = None;
        job.lock_expiration = None;
        job.revision += 1;
        Ok(job.retries)
    }
}
