pub mod executor;
pub mod job;
pub mod queue;
pub mod runtime;
pub mod throttle;
pub mod transport;

pub use executor::{ChainAdapter, ChainCall, Dispatcher, EthereumAdapter};
pub use job::{
    EnvelopeSchema, JobEnvelope, JobError, JobKind, JobOptions, SchemaValidator, ValidationError,
    Validator, ENGINE_VERSION,
};
pub use queue::{ConcurrencyQueue, JobHandle, JobHandler, QueueStats};
pub use runtime::config::{WorkerConfig, WorkerConfigBuilder, WorkerConfigParams};
pub use runtime::facade::{Collaborators, ExtractionWorker, ShutdownReport, Submission};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, MetricsSnapshot, Telemetry, TelemetrySnapshot};
pub use throttle::{
    AttemptScope, EndpointConfig, EndpointRegistry, RateLimit, RateLimiter, TimeoutController,
};
pub use transport::{RetryPolicy, Transport, TransportError, TransportOptions};
