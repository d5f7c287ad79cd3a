//! Retry bookkeeping and the shared retry/backoff loop used by the transport.

use crate::transport::error::TransportError;
use crate::transport::options::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Per-invocation retry state: created fresh for every request and dropped
/// once it resolves.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    pub attempt: usize,
    pub max_retries: usize,
    pub bailed: bool,
    url: &'a str,
    method: &'a str,
}

impl<'a> RetryContext<'a> {
    pub fn new(policy: &RetryPolicy, url: &'a str, method: &'a str) -> Self {
        Self {
            attempt: 0,
            max_retries: policy.max_retries,
            bailed: false,
            url,
            method,
        }
    }

    pub fn retries_left(&self) -> bool {
        self.attempt <= self.max_retries
    }

    fn log_retry(&self, backoff: Duration, err: &TransportError) {
        tracing::warn!(
            url = self.url,
            method = self.method,
            attempt = self.attempt,
            max_retries = self.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "request failed; retrying"
        );
    }

    fn log_exhausted(&self, err: &TransportError) {
        tracing::error!(
            url = self.url,
            method = self.method,
            attempt = self.attempt,
            error = %err,
            "request exhausted retries"
        );
    }

    fn log_bail(&self, err: &TransportError) {
        tracing::debug!(
            url = self.url,
            method = self.method,
            attempt = self.attempt,
            error = %err,
            "request failed with non-retryable error; bailing"
        );
    }
}

/// Runs `operation` until it succeeds, bails with a non-retryable error, or
/// exhausts `policy.max_retries`. The last failure is surfaced verbatim.
///
/// Backoff sleeps end early when `cancellation` fires; the following attempt
/// is then expected to observe the cancelled token and abort.
pub(crate) async fn retry_with_backoff<T, F, Fut, R>(
    mut context: RetryContext<'_>,
    policy: &RetryPolicy,
    cancellation: &CancellationToken,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, TransportError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    R: FnMut(usize, Duration, &TransportError),
{
    loop {
        context.attempt += 1;

        match operation(context.attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    context.bailed = true;
                    context.log_bail(&err);
                    return Err(err);
                }

                if !context.retries_left() {
                    context.log_exhausted(&err);
                    return Err(err);
                }

                let backoff = policy.backoff_delay(context.attempt);
                context.log_retry(backoff, &err);
                on_retry(context.attempt, backoff, &err);
                sleep_with_cancellation(backoff, cancellation).await;
            }
        }
    }
}

async fn sleep_with_cancellation(delay: Duration, cancellation: &CancellationToken) {
    if delay.is_zero() {
        yield_now().await;
        return;
    }

    tokio::select! {
        _ = cancellation.cancelled() => {}
        _ = sleep(delay) => {}
    }
}
