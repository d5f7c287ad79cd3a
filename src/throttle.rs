//! Per-destination throttling: the static endpoint table, token buckets keyed
//! by origin, and deadline-bound cancellation for the network phase.

pub mod limiter;
pub mod registry;
pub mod scope;
pub mod timeout;

pub use limiter::RateLimiter;
pub use registry::{resolve_origin, EndpointConfig, EndpointRegistry, RateLimit};
pub use scope::AttemptScope;
pub use timeout::TimeoutController;
