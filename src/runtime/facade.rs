//! Caller-facing boundary: validation, admission, and the terminate protocol.

use crate::executor::{ChainAdapter, Dispatcher};
use crate::job::{JobEnvelope, JobError, JobKind, SchemaValidator, ValidationError, Validator};
use crate::queue::{ConcurrencyQueue, JobHandle, QueueStats};
use crate::runtime::config::WorkerConfig;
use crate::runtime::telemetry::{self, MetricsSnapshot, Telemetry, TelemetrySnapshot};
use crate::transport::{Transport, TransportMetricsSnapshot};
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Optional replacements for the default collaborators.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub schema: Option<Arc<dyn SchemaValidator>>,
    pub chain_adapter: Option<Arc<dyn ChainAdapter>>,
}

/// Outcome of the terminate protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether every admitted job finished before the drain deadline.
    pub drained: bool,
    pub stats: QueueStats,
}

#[derive(Clone)]
pub struct ExtractionWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    config: WorkerConfig,
    validator: Validator,
    dispatcher: Arc<Dispatcher>,
    queue: ConcurrencyQueue,
    telemetry: Telemetry,
    accepting: AtomicBool,
    /// Fired once after `terminate` completes; stops background reporters.
    lifecycle: CancellationToken,
    shutdown_report: OnceCell<ShutdownReport>,
}

impl ExtractionWorker {
    /// Builds the worker with the default schema and chain adapter. Must be
    /// called from within a Tokio runtime.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: WorkerConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let transport = Transport::new(&config.transport_options())?;
        let mut dispatcher = Dispatcher::new(
            config.endpoints().clone(),
            transport,
            config.retry(),
            config.content_gateway(),
            shutdown.clone(),
        )?;
        if let Some(adapter) = collaborators.chain_adapter {
            dispatcher = dispatcher.with_chain_adapter(adapter);
        }
        let dispatcher = Arc::new(dispatcher);

        let validator = match collaborators.schema {
            Some(schema) => Validator::new(schema),
            None => Validator::default(),
        };
        let queue = ConcurrencyQueue::new(config.concurrency(), dispatcher.clone(), shutdown);

        tracing::info!(
            concurrency = config.concurrency(),
            endpoints = config.endpoints().len(),
            version = validator.version(),
            "extraction worker ready"
        );

        Ok(Self {
            inner: Arc::new(WorkerInner {
                config,
                validator,
                dispatcher,
                queue,
                telemetry: Telemetry::default(),
                accepting: AtomicBool::new(true),
                lifecycle: CancellationToken::new(),
                shutdown_report: OnceCell::new(),
            }),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot()
    }

    pub fn transport_metrics(&self) -> TransportMetricsSnapshot {
        self.inner.dispatcher.transport_metrics()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs: self.telemetry(),
            queue: self.stats(),
            transport: self.transport_metrics(),
        }
    }

    /// Logs [`MetricsSnapshot`]s every `metrics_interval` until the worker
    /// has terminated.
    pub fn spawn_metrics_reporter(&self) -> JoinHandle<()> {
        let worker = self.clone();
        telemetry::spawn_metrics_reporter(
            move || worker.metrics(),
            self.inner.lifecycle.clone(),
            self.inner.config.metrics_interval(),
        )
    }

    /// Validates and admits a typed envelope. Admission happens before this
    /// returns, so the call order of `enqueue` is the queue's FIFO order.
    pub fn enqueue(&self, envelope: JobEnvelope) -> Submission {
        self.inner.telemetry.record_submitted();
        match self.inner.validator.validate(&envelope.to_value()) {
            Ok(()) => self.admit(envelope),
            Err(err) => self.reject(envelope, err),
        }
    }

    /// Raw JSON counterpart of [`ExtractionWorker::enqueue`]. Envelopes that
    /// fail validation come back immediately as completed JSON.
    pub fn enqueue_value(&self, raw: Value) -> Result<Submission, Value> {
        self.inner.telemetry.record_submitted();
        if let Err(err) = self.inner.validator.validate(&raw) {
            self.log_validation_failure(&err);
            return Err(reject_raw(raw, JobError::Validation(err)));
        }

        match serde_json::from_value::<JobEnvelope>(raw.clone()) {
            Ok(envelope) => Ok(self.admit(envelope)),
            Err(err) => {
                let err = ValidationError::invalid("job", err.to_string());
                self.log_validation_failure(&err);
                Err(reject_raw(raw, JobError::Validation(err)))
            }
        }
    }

    pub async fn submit(&self, envelope: JobEnvelope) -> JobEnvelope {
        self.enqueue(envelope).wait().await
    }

    pub async fn submit_value(&self, raw: Value) -> Value {
        match self.enqueue_value(raw) {
            Ok(submission) => submission.wait().await.to_value(),
            Err(rejected) => {
                self.inner.telemetry.record_completion(
                    rejected.get("error").and_then(Value::as_str),
                );
                rejected
            }
        }
    }

    /// Stops acceptance, drains admitted jobs for up to `drain_timeout`, then
    /// forces a stop. Repeated calls return the first call's report.
    pub async fn terminate(&self) -> ShutdownReport {
        self.stop_accepting();
        *self
            .inner
            .shutdown_report
            .get_or_init(|| async {
                let drained = self
                    .inner
                    .queue
                    .drain(self.inner.config.drain_timeout())
                    .await;
                let report = ShutdownReport {
                    drained,
                    stats: self.inner.queue.stats(),
                };
                tracing::info!(
                    drained,
                    finished = report.stats.finished,
                    errored = report.stats.errored,
                    "extraction worker terminated"
                );
                self.inner.lifecycle.cancel();
                report
            })
            .await
    }

    /// Refuses new jobs without waiting for admitted ones.
    pub(crate) fn stop_accepting(&self) {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("terminate requested; no longer accepting jobs");
        }
        self.inner.queue.close();
    }

    fn admit(&self, envelope: JobEnvelope) -> Submission {
        let state = if envelope.kind() == JobKind::Terminate {
            self.stop_accepting();
            SubmissionState::Terminate(envelope)
        } else if !self.is_accepting() {
            SubmissionState::Ready(
                envelope.fail(JobError::Terminated("worker is no longer accepting jobs")),
            )
        } else {
            SubmissionState::Queued(self.inner.queue.enqueue(envelope))
        };

        Submission {
            worker: self.clone(),
            state,
        }
    }

    fn reject(&self, envelope: JobEnvelope, err: ValidationError) -> Submission {
        self.log_validation_failure(&err);
        Submission {
            worker: self.clone(),
            state: SubmissionState::Ready(envelope.fail(err.into())),
        }
    }

    fn log_validation_failure(&self, err: &ValidationError) {
        self.inner.telemetry.record_validation_failure();
        tracing::warn!(error = %err, "rejected invalid job");
    }
}

impl std::fmt::Debug for ExtractionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionWorker")
            .field("accepting", &self.is_accepting())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// An accepted submission whose completed envelope is not yet available.
pub struct Submission {
    worker: ExtractionWorker,
    state: SubmissionState,
}

enum SubmissionState {
    Ready(JobEnvelope),
    Queued(JobHandle),
    Terminate(JobEnvelope),
}

impl Submission {
    pub fn is_terminate(&self) -> bool {
        matches!(self.state, SubmissionState::Terminate(_))
    }

    pub async fn wait(self) -> JobEnvelope {
        let completed = match self.state {
            SubmissionState::Ready(envelope) => envelope,
            SubmissionState::Queued(handle) => handle.wait().await,
            SubmissionState::Terminate(envelope) => {
                let report = self.worker.terminate().await;
                envelope.complete(Ok(json!({
                    "terminated": true,
                    "drained": report.drained,
                })))
            }
        };
        self.worker
            .inner
            .telemetry
            .record_completion(completed.error.as_deref());
        completed
    }
}

fn reject_raw(raw: Value, err: JobError) -> Value {
    match raw {
        Value::Object(mut job) => {
            job.insert("results".into(), Value::Null);
            job.insert("error".into(), Value::String(err.to_string()));
            Value::Object(job)
        }
        _ => json!({ "results": null, "error": err.to_string() }),
    }
}
