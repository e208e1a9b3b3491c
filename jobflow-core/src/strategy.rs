use crate::config::BackoffConfig;
use crate::context::AcquisitionContext;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// What the upcoming wait represents. The acquisition loop lets a job-added
/// hint short-circuit an idle wait, but never a backoff or saturation wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitReason {
    None,
    Idle,
    Backoff,
    Saturation,
}

/// Adaptive controller deciding, per engine, how many jobs to request next
/// cycle and how long to pause before it. State is owned by the instance and
/// mutated only inside [`reconfigure`](AcquisitionStrategy::reconfigure);
/// one instance per acquisition loop, threaded through explicitly.
pub trait AcquisitionStrategy: Send {
    fn reconfigure(&mut self, context: &AcquisitionContext);

    fn num_jobs_to_acquire(&self, engine: &str) -> usize;

    fn wait_time(&self) -> Duration;

    fn wait_reason(&self) -> WaitReason;
}

/// The backoff variant:
///
/// - empty cycles escalate an idle wait geometrically up to a cap, reset by
///   the first acquired job;
/// - optimistic-lock conflicts escalate a jittered contention backoff, which
///   decays one level per `backoff_decrease_threshold` conflict-free cycles;
/// - dispatcher rejections throttle the next requested count down to the
///   capacity that was actually executable, and a fully rejected cycle pays
///   the fixed saturation wait instead of escalating anything.
pub struct BackoffStrategy {
    config: BackoffConfig,
    idle_level: u32,
    backoff_level: u32,
    conflict_free_cycles: u32,
    jobs_to_acquire: HashMap<String, usize>,
    wait: Duration,
    reason: WaitReason,
}

impl BackoffStrategy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            idle_level: 0,
            backoff_level: 0,
            conflict_free_cycles: 0,
            jobs_to_acquire: HashMap::new(),
            wait: Duration::ZERO,
            reason: WaitReason::None,
        }
    }

    fn scaled_wait(base: Duration, factor: f64, level: u32, max: Duration) -> Duration {
        let ms = base.as_millis() as f64 * factor.powi(level as i32);
        Duration::from_millis(ms.min(max.as_millis() as f64) as u64)
    }

    fn clamp_next(&self, next: usize) -> usize {
        next.max(self.config.min_jobs_per_acquisition)
            .min(self.config.max_jobs_per_acquisition)
    }
}

impl AcquisitionStrategy for BackoffStrategy {
    fn reconfigure(&mut self, context: &AcquisitionContext) {
        let acquired = context.total_acquired();
        let conflicts = context.total_failed_to_lock();
        self.wait = Duration::ZERO;
        self.reason = WaitReason::None;

        // Contention bookkeeping before the rejection pass, so a partial
        // rejection (which is not contention) can still reset the level.
        if conflicts > 0 {
            self.backoff_level = self.backoff_level.saturating_add(1);
            self.conflict_free_cycles = 0;
        } else if self.backoff_level > 0 {
            self.conflict_free_cycles += 1;
            if self.conflict_free_cycles >= self.config.backoff_decrease_threshold {
                self.backoff_level -= 1;
                self.conflict_free_cycles = 0;
            }
        }

        if acquired > 0 {
            self.idle_level = 0;
        } else if conflicts == 0 && !context.has_rejections() {
            self.wait = Self::scaled_wait(
                self.config.base_idle_wait,
                self.config.idle_increase_factor,
                self.idle_level,
                self.config.max_idle_wait,
            );
            self.reason = WaitReason::Idle;
            self.idle_level = self.idle_level.saturating_add(1);
        }

        let mut saturated = false;
        for engine in context.engines() {
            let engine_acquired = context
                .acquired_for(engine)
                .map_or(0, |jobs| jobs.size());
            let rejected = context.rejected_job_count(engine);
            if rejected > 0 {
                if context.all_batches_rejected(engine) {
                    saturated = true;
                }
                // Throttle to the capacity that was actually executable.
                let next = self.clamp_next(engine_acquired.saturating_sub(rejected));
                self.jobs_to_acquire.insert(engine.to_string(), next);
                self.backoff_level = 0;
                self.conflict_free_cycles = 0;
            } else {
                self.jobs_to_acquire
                    .insert(engine.to_string(), self.config.max_jobs_per_acquisition);
            }
        }

        if saturated {
            // Fixed, not escalated: there is simply no execution capacity.
            self.wait = self.config.execution_saturation_wait;
            self.reason = WaitReason::Saturation;
            return;
        }

        if self.backoff_level > 0 {
            let base = Self::scaled_wait(
                self.config.base_backoff_wait,
                self.config.backoff_increase_factor,
                self.backoff_level - 1,
                self.config.max_backoff_wait,
            );
            // Jitter up to +50% desynchronizes competing nodes.
            let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
            let backoff = base + Duration::from_millis(jitter_ms);
            if backoff > self.wait {
                self.wait = backoff;
                self.reason = WaitReason::Backoff;
            }
        }
    }

    fn num_jobs_to_acquire(&self, engine: &str) -> usize {
        self.jobs_to_acquire
            .get(engine)
            .copied()
            .unwrap_or(self.config.max_jobs_per_acquisition)
    }

    fn wait_time(&self) -> Duration {
        self.wait
    }

    fn wait_reason(&self) -> WaitReason {
        self.reason
    }
}
