//! Bounded-concurrency FIFO job queue with per-job failure isolation.

pub mod concurrency;
pub mod pending;
pub mod stats;

pub use concurrency::ConcurrencyQueue;
pub use pending::JobHandle;
pub use stats::QueueStats;

use crate::executor::Dispatcher;
use crate::job::JobEnvelope;
use futures::future::BoxFuture;

/// Executes one admitted envelope and returns it completed.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, envelope: JobEnvelope) -> BoxFuture<'_, JobEnvelope>;
}

impl JobHandler for Dispatcher {
    fn handle(&self, envelope: JobEnvelope) -> BoxFuture<'_, JobEnvelope> {
        Box::pin(self.route(envelope))
    }
}
