use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Job identifier (store-assigned, unique).
pub type JobId = Uuid;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ─── Job ──────────────────────────────────────────────────────

/// The kind of work a job carries. The scheduler never interprets the
/// payload; the only kind-sensitive behavior is the timer/non-timer
/// partition used by [`OrderPolicy::prefer_timer_jobs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Timer,
    Message,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspensionState {
    Active,
    Suspended,
}

/// A persisted unit of asynchronous work. Owned by the store; the scheduler
/// reads and mutates it only through the [`JobStore`](crate::store::JobStore)
/// gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// `None` means "due immediately".
    pub due_date: Option<Timestamp>,
    pub priority: i64,
    /// Exclusive jobs of the same scope must never run concurrently.
    pub exclusive: bool,
    pub process_instance_id: Uuid,
    pub root_process_instance_id: Uuid,
    pub deployment_id: Option<String>,
    pub retries: u32,
    pub lock_owner: Option<String>,
    pub lock_expiration: Option<Timestamp>,
    pub suspension_state: SuspensionState,
    /// Bumped on every store-side mutation; basis of the optimistic lock.
    pub revision: u64,
    /// Opaque handler configuration — passed through to the job handler,
    /// never parsed by the scheduler.
    pub payload: serde_json::Value,
}

impl Job {
    /// A fresh, immediately-due, non-exclusive job with default priority.
    pub fn new(kind: JobKind, process_instance_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            due_date: None,
            priority: 0,
            exclusive: false,
            process_instance_id,
            root_process_instance_id: process_instance_id,
            deployment_id: None,
            retries: 3,
            lock_owner: None,
            lock_expiration: None,
            suspension_state: SuspensionState::Active,
            revision: 0,
            payload: serde_json::Value::Null,
        }
    }

    pub fn lock_expired(&self, now: Timestamp) -> bool {
        match self.lock_expiration {
            Some(expires) => expires <= now,
            None => true,
        }
    }

    /// Whether an acquirer may select this job right now.
    ///
    /// Active, lock free (or expired), retries left, due (or no due date),
    /// and priority inside the configured range. The range applies whenever
    /// a bound is set, independent of any ordering flag.
    pub fn is_acquirable(&self, now: Timestamp, range: &PriorityRange) -> bool {
        self.suspension_state == SuspensionState::Active
            && self.retries > 0
            && (self.lock_owner.is_none() || self.lock_expired(now))
            && self.due_date.map_or(true, |due| due <= now)
            && range.contains(self.priority)
    }
}

// ─── Acquisition filters ──────────────────────────────────────

/// Inclusive priority interval assigned to one worker node. Disjoint ranges
/// partition the queue between nodes with no coordination; overlapping
/// ranges give active/active redundancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl PriorityRange {
    pub const UNBOUNDED: PriorityRange = PriorityRange {
        min: None,
        max: None,
    };

    pub fn contains(&self, priority: i64) -> bool {
        self.min.map_or(true, |min| priority >= min) && self.max.map_or(true, |max| priority <= max)
    }
}

/// Ordering flags for candidate selection. All optional; with none enabled
/// the store's natural (creation) order is used. Precedence when several are
/// enabled: timer preference, then priority descending, then due date
/// ascending (a missing due date sorts first, it is already due).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPolicy {
    pub prefer_timer_jobs: bool,
    pub acquire_by_priority: bool,
    pub acquire_by_due_date: bool,
}

// ─── Optimistic locking ───────────────────────────────────────

/// Result of the store's optimistic lock primitive. A conflict means another
/// acquirer claimed the job first; it is an expected outcome, never an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    Conflict,
}
