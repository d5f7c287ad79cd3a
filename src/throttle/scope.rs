//! Per-attempt gating for one request: a rate-limiter token for the
//! destination origin, then a fresh deadline for that attempt's network phase.

use crate::throttle::limiter::RateLimiter;
use crate::throttle::timeout::TimeoutController;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct AttemptScope {
    shutdown: CancellationToken,
    throttle: Option<(RateLimiter, String)>,
    timeout: Option<Duration>,
}

impl AttemptScope {
    /// Unthrottled and unbounded; only `shutdown` aborts attempts.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            throttle: None,
            timeout: None,
        }
    }

    /// Every attempt first takes a token for `origin` from `limiter`.
    pub fn throttled(mut self, limiter: RateLimiter, origin: impl Into<String>) -> Self {
        self.throttle = Some((limiter, origin.into()));
        self
    }

    /// Budget for the network phase of each attempt.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn origin(&self) -> Option<&str> {
        self.throttle.as_ref().map(|(_, origin)| origin.as_str())
    }

    /// Waits for a token, then arms the attempt's deadline. Returns `None`
    /// when shutdown fires first.
    pub async fn begin_attempt(&self) -> Option<TimeoutController> {
        if self.shutdown.is_cancelled() {
            return None;
        }

        if let Some((limiter, origin)) = &self.throttle {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = limiter.acquire(origin) => {}
            }
        }

        Some(TimeoutController::bind(self.timeout, &self.shutdown))
    }

    /// Timeout to report for an aborted attempt; `None` once shutdown fired.
    pub fn fired_timeout(&self, controller: &TimeoutController) -> Option<Duration> {
        if self.shutdown.is_cancelled() || !controller.is_fired() {
            None
        } else {
            controller.timeout()
        }
    }
}
