//! FIFO admission with at most N jobs executing at once.
//!
//! A single driver task pulls admitted jobs off an unbounded channel in
//! arrival order and hands each one a semaphore permit before spawning it, so
//! admission order is exactly push order while completion order is free.

use crate::job::{JobEnvelope, JobError};
use crate::queue::pending::{JobHandle, PendingJob};
use crate::queue::stats::{QueueCounters, QueueStats};
use crate::queue::JobHandler;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const DEFAULT_CONCURRENCY: usize = 1;

/// How long a running job may keep going after a forced stop before its
/// future is dropped and the job is answered without it.
pub const ABANDON_GRACE: Duration = Duration::from_secs(1);

pub struct ConcurrencyQueue {
    concurrency: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<PendingJob>>>,
    tracker: TaskTracker,
    counters: Arc<QueueCounters>,
    shutdown: CancellationToken,
}

impl ConcurrencyQueue {
    /// Starts the queue's driver task; must be called from within a Tokio
    /// runtime. Cancelling `shutdown` rejects every job that has not started.
    pub fn new(
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, inbox) = mpsc::unbounded_channel();
        let tracker = TaskTracker::new();
        let counters = Arc::new(QueueCounters::default());

        let driver = Driver {
            inbox,
            permits: Arc::new(Semaphore::new(concurrency)),
            handler,
            tracker: tracker.clone(),
            counters: counters.clone(),
            shutdown: shutdown.clone(),
        };
        tracker.spawn(driver.run());

        Self {
            concurrency,
            sender: Mutex::new(Some(sender)),
            tracker,
            counters,
            shutdown,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Admits `envelope` and returns the handle its completion is delivered
    /// on. Admission is synchronous, so call order is queue order.
    pub fn enqueue(&self, envelope: JobEnvelope) -> JobHandle {
        let job_type = envelope.job_type.clone();
        let (job, handle) = PendingJob::new(envelope);

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            job.reject(JobError::Terminated("worker is no longer accepting jobs"));
            return handle;
        };

        self.counters.record_push();
        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            self.counters.record_finish(false, true);
            job.reject(JobError::Terminated("worker is no longer accepting jobs"));
            return handle;
        }

        tracing::debug!(job_type = job_type.as_str(), "job admitted");
        handle
    }

    pub async fn push(&self, envelope: JobEnvelope) -> JobEnvelope {
        self.enqueue(envelope).wait().await
    }

    /// Stops admission. Already admitted jobs keep running.
    pub fn close(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            tracing::info!("job queue closed to new admissions");
        }
        self.tracker.close();
    }

    /// Closes the queue and waits up to `timeout` for admitted jobs to finish.
    /// Past the deadline the shutdown token is cancelled, which aborts running
    /// jobs and rejects queued ones. A job still running [`ABANDON_GRACE`]
    /// after that is dropped and answered with `TerminatedError`, so the wait
    /// is bounded. Returns whether the drain finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            tracing::info!("job queue drained");
            return true;
        }

        let stats = self.stats();
        tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            running = stats.running,
            queued = stats.queued,
            "drain deadline passed; forcing stop"
        );
        self.shutdown.cancel();
        self.tracker.wait().await;
        false
    }
}

impl std::fmt::Debug for ConcurrencyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyQueue")
            .field("concurrency", &self.concurrency)
            .field("stats", &self.stats())
            .finish()
    }
}

struct Driver {
    inbox: mpsc::UnboundedReceiver<PendingJob>,
    permits: Arc<Semaphore>,
    handler: Arc<dyn JobHandler>,
    tracker: TaskTracker,
    counters: Arc<QueueCounters>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        while let Some(job) = self.next_job().await {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.reject(job);
                    break;
                }
                permit = self.permits.clone().acquire_owned() => permit,
            };

            match permit {
                Ok(permit) => self.spawn(job, permit),
                Err(_) => {
                    self.reject(job);
                    break;
                }
            }
        }

        self.inbox.close();
        while let Some(job) = self.inbox.recv().await {
            self.reject(job);
        }
    }

    async fn next_job(&mut self) -> Option<PendingJob> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            job = self.inbox.recv() => job,
        }
    }

    fn reject(&self, job: PendingJob) {
        self.counters.record_finish(false, true);
        job.reject(JobError::Terminated("worker stopped before the job started"));
    }

    fn spawn(&self, job: PendingJob, permit: OwnedSemaphorePermit) {
        let handler = self.handler.clone();
        let counters = self.counters.clone();
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            let _permit = permit;
            let PendingJob {
                envelope,
                reply,
                admitted_at,
            } = job;
            counters.record_start();
            tracing::debug!(
                job_type = envelope.job_type.as_str(),
                queued_ms = admitted_at.elapsed().as_millis() as u64,
                "job started"
            );

            let fallback = envelope.clone();
            let work = AssertUnwindSafe(async move { handler.handle(envelope).await })
                .catch_unwind();
            let abandoned = async {
                shutdown.cancelled().await;
                tokio::time::sleep(ABANDON_GRACE).await;
            };
            let result = tokio::select! {
                result = work => Some(result),
                _ = abandoned => None,
            };

            let completed = match result {
                Some(Ok(completed)) => completed,
                None => {
                    tracing::warn!(
                        job_type = fallback.job_type.as_str(),
                        grace_ms = ABANDON_GRACE.as_millis() as u64,
                        "job ignored the forced stop; abandoning it"
                    );
                    fallback.fail(JobError::Terminated(
                        "job ignored cancellation and was abandoned",
                    ))
                }
                Some(Err(panic_payload)) => {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        job_type = fallback.job_type.as_str(),
                        panic = %panic_msg,
                        "executor panicked"
                    );
                    fallback.fail(JobError::Panicked(panic_msg))
                }
            };

            let failed = completed.error.is_some();
            counters.record_finish(true, failed);
            tracing::debug!(
                job_type = completed.job_type.as_str(),
                failed,
                elapsed_ms = admitted_at.elapsed().as_millis() as u64,
                "job completed"
            );
            let _ = reply.send(completed);
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
