use crate::queue::QueueStats;
use crate::transport::TransportMetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Facade-level job counters.
#[derive(Default, Debug)]
pub struct Telemetry {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    validation_failures: AtomicU64,
    aborted: AtomicU64,
}

impl Telemetry {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a delivered envelope. `error` is the envelope's error text.
    pub fn record_completion(&self, error: Option<&str>) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = error {
            self.failed.fetch_add(1, Ordering::Relaxed);
            if error.starts_with("AbortError") {
                self.aborted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub validation_failures: u64,
    pub aborted: u64,
}

/// Everything the metrics reporter logs on each tick.
#[derive(Debug, Copy, Clone)]
pub struct MetricsSnapshot {
    pub jobs: TelemetrySnapshot,
    pub queue: QueueStats,
    pub transport: TransportMetricsSnapshot,
}

/// Spawns a background task that periodically logs job throughput, queue
/// occupancy and transport counters until `shutdown` fires.
pub fn spawn_metrics_reporter<F>(
    snapshot: F,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()>
where
    F: Fn() -> MetricsSnapshot + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_completed = snapshot().jobs.completed;
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "extraction_worker::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = snapshot();
                    let completed_delta = current.jobs.completed.saturating_sub(last_completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "extraction_worker::metrics",
                        throughput = format!("{throughput:.2}"),
                        submitted = current.jobs.submitted,
                        completed = current.jobs.completed,
                        failed = current.jobs.failed,
                        validation_failures = current.jobs.validation_failures,
                        queued = current.queue.queued,
                        running = current.queue.running,
                        peak_running = current.queue.peak_running,
                        requests = current.transport.total_requests,
                        retries = current.transport.total_retries,
                        aborts = current.transport.total_aborts,
                        avg_latency_ms = format!("{:.2}", current.transport.average_latency_ms),
                        "runtime metrics snapshot"
                    );

                    last_completed = current.jobs.completed;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
