use crate::runtime::facade::{ExtractionWorker, ShutdownReport, Submission};
use serde_json::Value;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Drives an [`ExtractionWorker`] from a channel of raw JSON jobs and handles
/// OS signals for graceful shutdowns.
pub struct Runner {
    worker: ExtractionWorker,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(worker: ExtractionWorker) -> Self {
        Self {
            worker,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the runner's shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn worker(&self) -> &ExtractionWorker {
        &self.worker
    }

    /// Admits every message from `inbox` in arrival order and sends each
    /// completed envelope to `outbox` as soon as it finishes.
    ///
    /// Stops reading on a `terminate` message, when `inbox` closes, or when
    /// the shutdown token is cancelled. Messages still buffered in `inbox` are
    /// then answered with `TerminatedError`, the terminate protocol runs, and
    /// the terminate envelope's reply, if one was received, is sent last.
    pub async fn run(
        &self,
        mut inbox: mpsc::Receiver<Value>,
        outbox: mpsc::Sender<Value>,
    ) -> ShutdownReport {
        let reporter = self.worker.spawn_metrics_reporter();
        let replies = TaskTracker::new();
        let mut terminate: Option<Submission> = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("runner shutdown token cancelled");
                    break;
                }
                message = inbox.recv() => message,
            };
            let Some(raw) = message else {
                tracing::info!("job channel closed; shutting down runner");
                break;
            };

            match self.worker.enqueue_value(raw) {
                Ok(submission) if submission.is_terminate() => {
                    terminate = Some(submission);
                    break;
                }
                admitted => self.reply_later(admitted, &outbox, &replies).await,
            }
        }

        self.worker.stop_accepting();
        inbox.close();
        let mut late = 0usize;
        while let Some(raw) = inbox.recv().await {
            late += 1;
            let admitted = self.worker.enqueue_value(raw);
            self.reply_later(admitted, &outbox, &replies).await;
        }
        if late > 0 {
            tracing::info!(late, "answered messages received after shutdown began");
        }

        let report = self.worker.terminate().await;
        replies.close();
        replies.wait().await;

        if let Some(submission) = terminate {
            send(&outbox, submission.wait().await.to_value()).await;
        }
        reporter.abort();
        report
    }

    async fn reply_later(
        &self,
        admitted: Result<Submission, Value>,
        outbox: &mpsc::Sender<Value>,
        replies: &TaskTracker,
    ) {
        match admitted {
            Err(rejected) => send(outbox, rejected).await,
            Ok(submission) => {
                let outbox = outbox.clone();
                replies.spawn(async move {
                    let completed = submission.wait().await;
                    send(&outbox, completed.to_value()).await;
                });
            }
        }
    }

    /// Like [`Runner::run`], additionally stopping on Ctrl-C (SIGINT).
    pub async fn run_until_ctrl_c(
        &self,
        inbox: mpsc::Receiver<Value>,
        outbox: mpsc::Sender<Value>,
    ) -> ShutdownReport {
        let token = self.shutdown.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(()) => {
                        tracing::info!("Ctrl-C received; shutting down runner");
                        token.cancel();
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to listen for Ctrl-C"),
                },
                _ = token.cancelled() => {}
            }
        });

        let report = self.run(inbox, outbox).await;
        listener.abort();
        report
    }
}

async fn send(outbox: &mpsc::Sender<Value>, completed: Value) {
    if outbox.send(completed).await.is_err() {
        tracing::warn!("reply channel closed; dropping completed job");
    }
}
