//! Per-origin token buckets.
//!
//! Each bucket holds `requests_per_interval` tokens. A spent token flows back
//! into its bucket exactly one interval after it was spent, so refills are
//! lazy and pro-rata to usage instead of whole-bucket bursts, and no origin
//! ever sees more than `requests_per_interval` grants inside any window of one
//! interval.

use crate::throttle::registry::{EndpointRegistry, RateLimit};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    interval: Duration,
    tokens: u32,
    spent: VecDeque<Instant>,
}

impl TokenBucket {
    fn new(rate: RateLimit) -> Self {
        let capacity = rate.requests_per_interval.max(1);
        Self {
            capacity,
            interval: rate.interval,
            tokens: capacity,
            spent: VecDeque::with_capacity(capacity as usize),
        }
    }

    fn refill(&mut self, now: Instant) {
        while let Some(spent_at) = self.spent.front().copied() {
            if now.saturating_duration_since(spent_at) < self.interval {
                break;
            }
            self.spent.pop_front();
            self.tokens = (self.tokens + 1).min(self.capacity);
        }
    }

    /// Takes a token, or reports how long until the next one returns.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            self.spent.push_back(now);
            return Ok(());
        }

        let wait = self
            .spent
            .front()
            .map(|spent_at| (*spent_at + self.interval).saturating_duration_since(now))
            .unwrap_or(self.interval);
        Err(wait.max(Duration::from_millis(1)))
    }
}

/// Snapshot of one origin's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub capacity: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    buckets: Arc<HashMap<String, Mutex<TokenBucket>>>,
}

impl RateLimiter {
    pub fn from_registry(registry: &EndpointRegistry) -> Self {
        let buckets = registry
            .iter()
            .filter_map(|(origin, config)| {
                config
                    .rate
                    .map(|rate| (origin.to_owned(), Mutex::new(TokenBucket::new(rate))))
            })
            .collect();
        Self {
            buckets: Arc::new(buckets),
        }
    }

    pub fn is_throttled(&self, origin: &str) -> bool {
        self.buckets.contains_key(origin)
    }

    /// Consumes one token for `origin`, suspending until one is available.
    /// Origins without a configured rate return immediately. Returns the time
    /// spent waiting.
    pub async fn acquire(&self, origin: &str) -> Duration {
        let Some(bucket) = self.buckets.get(origin) else {
            return Duration::ZERO;
        };

        let started = Instant::now();
        loop {
            let outcome = {
                let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                bucket.try_take(Instant::now())
            };

            match outcome {
                Ok(()) => return started.elapsed(),
                Err(wait) => {
                    tracing::debug!(
                        origin,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit reached; waiting for a token"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    pub fn snapshot(&self, origin: &str) -> Option<BucketSnapshot> {
        self.buckets.get(origin).map(|bucket| {
            let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.refill(Instant::now());
            BucketSnapshot {
                capacity: bucket.capacity,
                available: bucket.tokens,
            }
        })
    }
}
