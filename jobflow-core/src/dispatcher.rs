use crate::config::{PoolConfig, ShutdownMode};
use crate::metrics::ExecutorMetrics;
use crate::store::JobStore;
use crate::types::{Job, JobId};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;

/// Entry point into the (out-of-scope) process runtime: executes one job's
/// payload. The scheduler only consumes the binary outcome; a failure feeds
/// the retry/incident path of that job alone.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

/// One batch handed to the pool: the job ids plus the store they live in
/// (batches from different engines flow through the same pool).
pub struct BatchSubmission {
    pub engine: String,
    pub store: Arc<dyn JobStore>,
    pub job_ids: Vec<JobId>,
}

/// Typed saturation signal: the queue is full and the pool is at its worker
/// ceiling. The ids are handed back so the caller can record the rejection;
/// their locks simply expire, no unlock is needed.
#[derive(Debug, thiserror::Error)]
#[error("execution pool saturated, rejected batch of {} jobs", .0.len())]
pub struct BatchRejected(pub Vec<JobId>);

struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Bounded worker pool executing batches.
///
/// `core_workers` long-lived workers drain a bounded queue; when the queue is
/// full a transient overflow worker runs the batch directly, up to
/// `max_workers` total. Past that, [`try_submit`](Dispatcher::try_submit)
/// rejects synchronously — the saturation signal the strategy consumes.
///
/// A worker executes a batch's jobs strictly sequentially, which is what
/// makes the batch an exclusivity unit: two jobs sharing a scope are never in
/// flight at the same time.
pub struct Dispatcher {
    tx: mpsc::Sender<BatchSubmission>,
    overflow: Arc<Semaphore>,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<ExecutorMetrics>,
    in_flight: Arc<InFlight>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        pool: &PoolConfig,
        metrics: Arc<ExecutorMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<BatchSubmission>(pool.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let in_flight = Arc::new(InFlight::new());

        let core = pool.core_workers.max(1);
        let mut workers = Vec::with_capacity(core);
        for _ in 0..core {
            let rx = rx.clone();
            let handler = handler.clone();
            let metrics = metrics.clone();
            let in_flight = in_flight.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let batch = { rx.lock().await.recv().await };
                    match batch {
                        Some(batch) => {
                            run_batch(&handler, &metrics, batch).await;
                            in_flight.exit();
                        }
                        None => break,
                    }
                }
            }));
        }

        let overflow_permits = pool.max_workers.saturating_sub(core);
        Self {
            tx,
            overflow: Arc::new(Semaphore::new(overflow_permits)),
            handler,
            metrics,
            in_flight,
            workers,
        }
    }

    /// Submit a batch, or reject it synchronously when the pool is saturated.
    pub fn try_submit(&self, batch: BatchSubmission) -> Result<(), BatchRejected> {
        // Counted before the hand-off: a worker may pop and finish the batch
        // before try_send even returns.
        self.in_flight.enter();
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                let Ok(permit) = self.overflow.clone().try_acquire_owned() else {
                    self.in_flight.exit();
                    return Err(BatchRejected(batch.job_ids));
                };
                let handler = self.handler.clone();
                let metrics = self.metrics.clone();
                let in_flight = self.in_flight.clone();
                tokio::spawn(async move {
                    run_batch(&handler, &metrics, batch).await;
                    drop(permit);
                    in_flight.exit();
                });
                Ok(())
            }
            Err(TrySendError::Closed(batch)) => {
                self.in_flight.exit();
                Err(BatchRejected(batch.job_ids))
            }
        }
    }

    pub fn batches_in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Close the queue and wind down. `Graceful` waits for every submitted
    /// batch; `Immediate` detaches — workers keep draining on their own and
    /// locks of anything left behind expire naturally.
    pub async fn shutdown(self, mode: ShutdownMode) {
        drop(self.tx);
        match mode {
            ShutdownMode::Graceful => {
                self.in_flight.wait_idle().await;
                for worker in self.workers {
                    let _ = worker.await;
                }
            }
            ShutdownMode::Immediate => {}
        }
    }
}

/// Execute one batch strictly sequentially, each job on its own. A job's
/// failure decrements its retries and, at zero, escalates — it never aborts
/// the remaining jobs of the batch.
async fn run_batch(
    handler: &Arc<dyn JobHandler>,
    metrics: &Arc<ExecutorMetrics>,
    batch: BatchSubmission,
) {
    for id in batch.job_ids {
        let job = match batch.store.find_job_by_id(id).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(error) => {
                tracing::warn!(job_id = %id, %error, "failed to load job for execution");
                continue;
            }
        };

        match handler.execute(&job).await {
            Ok(()) => {
                metrics.record_job_executed();
                if let Err(error) = batch.store.delete_job(id).await {
                    tracing::warn!(job_id = %id, %error, "failed to delete completed job");
                }
            }
            Err(error) => {
                metrics.record_execution_failure();
                match batch.store.decrement_retries(id).await {
                    Ok(0) => {
                        metrics.record_incident();
                        tracing::error!(
                            job_id = %id,
                            engine = %batch.engine,
                            %error,
                            "job retries exhausted, escalating to incident"
                        );
                    }
                    Ok(remaining) => {
                        tracing::debug!(job_id = %id, remaining, %error, "job failed, will retry");
                    }
                    Err(store_error) => {
                        tracing::warn!(job_id = %id, %store_error, "failed to decrement retries");
                    }
                }
            }
        }
    }
}
