//! Deadline-bound cancellation for the network phase of a single job.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Owns a [`CancellationToken`] that fires once after the configured duration
/// unless the controller is dropped first. Dropping the controller disarms the
/// timer without cancelling the token.
#[derive(Debug)]
pub struct TimeoutController {
    token: CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl TimeoutController {
    /// Arms a controller. `None` means the token only fires through `parent`
    /// or an explicit [`TimeoutController::abort`].
    pub fn bind(timeout: Option<Duration>, parent: &CancellationToken) -> Self {
        let token = parent.child_token();
        let deadline = timeout.map(|duration| Instant::now() + duration);

        let timer = timeout.zip(deadline).map(|(duration, deadline)| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = sleep_until(deadline) => {
                        tracing::debug!(
                            timeout_ms = duration.as_millis() as u64,
                            "attempt deadline reached; aborting network phase"
                        );
                        token.cancel();
                    }
                }
            })
        });

        Self {
            token,
            timeout,
            deadline,
            timer,
        }
    }

    pub fn unbounded(parent: &CancellationToken) -> Self {
        Self::bind(None, parent)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fires the signal immediately.
    pub fn abort(&self) {
        self.token.cancel();
    }
}

impl Drop for TimeoutController {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
