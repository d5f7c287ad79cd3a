//! HTTP transport plumbing: the retry/bail request primitive, its error
//! classification, retry policy, and request metrics.

pub mod client;
pub mod error;
pub mod metrics;
pub mod options;
pub mod retry;

pub use client::{HttpRequest, Transport};
pub use error::TransportError;
pub use metrics::TransportMetricsSnapshot;
pub use options::{RetryPolicy, TransportOptions};
pub use retry::RetryContext;
