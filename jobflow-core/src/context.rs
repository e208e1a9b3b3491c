use crate::types::JobId;
use std::collections::HashMap;

// ─── AcquiredJobs ─────────────────────────────────────────────

/// The outcome of one acquisition round: an ordered list of batches, each
/// batch an ordered list of job ids sharing one exclusivity scope.
///
/// A batch is the unit of strictly sequential execution; batches run in
/// parallel with each other. A job id appears in at most one batch, removing
/// an id never disturbs other batches, and a batch that becomes empty is
/// dropped.
#[derive(Clone, Debug, Default)]
pub struct AcquiredJobs {
    num_jobs_to_acquire: usize,
    batches: Vec<Vec<JobId>>,
    num_jobs_failed_to_lock: usize,
}

impl AcquiredJobs {
    pub fn new(num_jobs_to_acquire: usize) -> Self {
        Self {
            num_jobs_to_acquire,
            batches: Vec::new(),
            num_jobs_failed_to_lock: 0,
        }
    }

    /// The count that was requested from the store this round.
    pub fn num_jobs_to_acquire(&self) -> usize {
        self.num_jobs_to_acquire
    }

    pub fn push_batch(&mut self, batch: Vec<JobId>) {
        if !batch.is_empty() {
            self.batches.push(batch);
        }
    }

    /// Drop a single job (lost lock race) from whatever batch holds it.
    pub fn remove_job(&mut self, id: JobId) {
        for batch in &mut self.batches {
            batch.retain(|j| *j != id);
        }
        self.batches.retain(|b| !b.is_empty());
    }

    pub fn record_failed_lock(&mut self) {
        self.num_jobs_failed_to_lock += 1;
    }

    pub fn num_jobs_failed_to_lock(&self) -> usize {
        self.num_jobs_failed_to_lock
    }

    pub fn batches(&self) -> &[Vec<JobId>] {
        &self.batches
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// Total jobs across all batches.
    pub fn size(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

// ─── AcquisitionContext ───────────────────────────────────────

/// Per-cycle accumulator feeding the acquisition strategy: what each engine
/// acquired, and which batches the dispatcher rejected at submit time.
/// Reset at the start of every cycle.
#[derive(Debug, Default)]
pub struct AcquisitionContext {
    acquired: HashMap<String, AcquiredJobs>,
    rejected: HashMap<String, Vec<Vec<JobId>>>,
}

impl AcquisitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.acquired.clear();
        self.rejected.clear();
    }

    pub fn submit_acquired(&mut self, engine: &str, jobs: AcquiredJobs) {
        self.acquired.insert(engine.to_string(), jobs);
    }

    pub fn submit_rejected(&mut self, engine: &str, batch: Vec<JobId>) {
        self.rejected.entry(engine.to_string()).or_default().push(batch);
    }

    pub fn engines(&self) -> impl Iterator<Item = &str> {
        self.acquired.keys().map(String::as_str)
    }

    pub fn acquired_for(&self, engine: &str) -> Option<&AcquiredJobs> {
        self.acquired.get(engine)
    }

    pub fn total_acquired(&self) -> usize {
        self.acquired.values().map(AcquiredJobs::size).sum()
    }

    pub fn total_failed_to_lock(&self) -> usize {
        self.acquired
            .values()
            .map(AcquiredJobs::num_jobs_failed_to_lock)
            .sum()
    }

    pub fn has_rejections(&self) -> bool {
        self.rejected.values().any(|batches| !batches.is_empty())
    }

    pub fn rejected_batch_count(&self, engine: &str) -> usize {
        self.rejected.get(engine).map_or(0, Vec::len)
    }

    pub fn rejected_job_count(&self, engine: &str) -> usize {
        self.rejected
            .get(engine)
            .map_or(0, |batches| batches.iter().map(Vec::len).sum())
    }

    /// Full saturation: the engine produced batches and every one of them
    /// bounced off the execution pool.
    pub fn all_batches_rejected(&self, engine: &str) -> bool {
        let submitted = self
            .acquired
            .get(engine)
            .map_or(0, AcquiredJobs::num_batches);
        submitted > 0 && self.rejected_batch_count(engine) >= submitted
    }
}
