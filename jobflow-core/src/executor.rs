use crate::acquisition::AcquireJobsCmd;
use crate::config::{JobExecutorConfig, ShutdownMode};
use crate::context::AcquisitionContext;
use crate::dispatcher::{BatchSubmission, Dispatcher, JobHandler};
use crate::metrics::{ExecutorMetrics, MetricsSnapshot};
use crate::store::JobStore;
use crate::strategy::{AcquisitionStrategy, BackoffStrategy, WaitReason};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The "job added" wake-up channel. The latch is cleared at the top of every
/// cycle, so a hint cancels the idle sleep of the cycle it was raised in and
/// nothing after that: hints raised during a zero-wait cycle are no-ops, and
/// backoff or saturation waits are never interrupted.
#[derive(Default)]
struct JobAddedHint {
    raised: AtomicBool,
    notify: Notify,
}

impl JobAddedHint {
    fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }
}

struct Engine {
    name: String,
    store: Arc<dyn JobStore>,
    cmd: AcquireJobsCmd,
}

/// The scheduling heartbeat: one control task that repeatedly acquires jobs
/// per registered engine, dispatches the batches, feeds the results back
/// into the strategy, and sleeps for whatever wait it computed.
///
/// Multiple executors (across processes, or in one) may run against the same
/// store with no shared state; coordination happens entirely through the
/// store's optimistic lock.
pub struct JobExecutor {
    config: JobExecutorConfig,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<ExecutorMetrics>,
    engines: Vec<(String, Arc<dyn JobStore>)>,
}

impl JobExecutor {
    pub fn new(config: JobExecutorConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            config,
            handler,
            metrics: Arc::new(ExecutorMetrics::new()),
            engines: Vec::new(),
        }
    }

    /// Register a logical engine. One physical executor can serve several
    /// engines; each gets its own acquisition round per cycle.
    pub fn register_engine(&mut self, name: impl Into<String>, store: Arc<dyn JobStore>) {
        self.engines.push((name.into(), store));
    }

    pub fn metrics(&self) -> Arc<ExecutorMetrics> {
        self.metrics.clone()
    }

    /// Spawn the acquisition loop. The returned handle is the only way to
    /// signal the loop; stop is cooperative, honored at cycle boundaries and
    /// at the sleep point.
    pub fn start(self) -> ExecutorHandle {
        let lock_owner = self
            .config
            .lock_owner
            .clone()
            .unwrap_or_else(|| format!("jobflow-{}", Uuid::now_v7()));

        let engines: Vec<Engine> = self
            .engines
            .into_iter()
            .map(|(name, store)| Engine {
                cmd: AcquireJobsCmd::new(store.clone(), &self.config, lock_owner.clone()),
                name,
                store,
            })
            .collect();

        let dispatcher = Dispatcher::new(self.handler, &self.config.pool, self.metrics.clone());
        let strategy = BackoffStrategy::new(self.config.backoff.clone());

        let (stop_tx, stop_rx) = watch::channel(None::<ShutdownMode>);
        let hint = Arc::new(JobAddedHint::default());
        let join = tokio::spawn(acquisition_loop(
            engines,
            strategy,
            dispatcher,
            self.metrics.clone(),
            hint.clone(),
            stop_rx,
        ));

        ExecutorHandle {
            stop: stop_tx,
            hint,
            metrics: self.metrics,
            join,
        }
    }
}

/// Control handle for a running executor.
pub struct ExecutorHandle {
    stop: watch::Sender<Option<ShutdownMode>>,
    hint: Arc<JobAddedHint>,
    metrics: Arc<ExecutorMetrics>,
    join: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Hint that a job was created outside the loop's view. Short-circuits an
    /// idle wait only; a no-op while the loop is busy or backing off.
    pub fn job_added(&self) {
        self.hint.raise();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the loop. `Graceful` also waits for every dispatched batch to
    /// finish; `Immediate` leaves them running detached.
    pub async fn stop(self, mode: ShutdownMode) -> Result<()> {
        let _ = self.stop.send(Some(mode));
        self.join.await?;
        Ok(())
    }
}

async fn acquisition_loop(
    engines: Vec<Engine>,
    mut strategy: BackoffStrategy,
    dispatcher: Dispatcher,
    metrics: Arc<ExecutorMetrics>,
    hint: Arc<JobAddedHint>,
    mut stop_rx: watch::Receiver<Option<ShutdownMode>>,
) {
    let mut context = AcquisitionContext::new();

    let mode = loop {
        if let Some(mode) = *stop_rx.borrow() {
            break mode;
        }

        // A hint raised before this point is moot: the cycle about to run
        // queries the store anyway.
        hint.take();

        context.reset();
        for engine in &engines {
            let requested = strategy.num_jobs_to_acquire(&engine.name);
            let acquired = match engine.cmd.acquire(requested).await {
                Ok(acquired) => acquired,
                Err(error) => {
                    // The whole round for this engine failed; no partial lock
                    // state is visible. Log and move on to the next cycle.
                    tracing::warn!(engine = %engine.name, %error, "job acquisition failed");
                    continue;
                }
            };

            metrics.record_jobs_acquired(acquired.size() as u64);
            metrics.record_lock_conflicts(acquired.num_jobs_failed_to_lock() as u64);

            for batch in acquired.batches() {
                let submission = BatchSubmission {
                    engine: engine.name.clone(),
                    store: engine.store.clone(),
                    job_ids: batch.clone(),
                };
                if let Err(rejected) = dispatcher.try_submit(submission) {
                    metrics.record_batch_rejected();
                    context.submit_rejected(&engine.name, rejected.0);
                }
            }
            context.submit_acquired(&engine.name, acquired);
        }

        strategy.reconfigure(&context);
        let wait = strategy.wait_time();
        tracing::debug!(
            acquired = context.total_acquired(),
            in_flight = dispatcher.batches_in_flight(),
            wait_ms = wait.as_millis() as u64,
            "acquisition cycle complete"
        );

        if wait.is_zero() {
            continue;
        }
        if strategy.wait_reason() == WaitReason::Idle {
            // A hint raised during this cycle cancels its idle wait.
            if hint.take() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = hint.notify.notified() => {
                    hint.take();
                }
                _ = stop_rx.changed() => {}
            }
        } else {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => {}
            }
        }
    };

    dispatcher.shutdown(mode).await;
}
