use crate::executor::content::DEFAULT_GATEWAY;
use crate::queue::concurrency::DEFAULT_CONCURRENCY;
use crate::runtime::telemetry;
use crate::throttle::{EndpointConfig, EndpointRegistry, RateLimit};
use crate::transport::options::DEFAULT_MAX_RETRIES;
use crate::transport::{RetryPolicy, TransportOptions};
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration for the extraction worker.
///
/// All instances must be constructed via [`WorkerConfig::builder`],
/// [`WorkerConfig::new`] or [`WorkerConfig::from_json_str`] so invariants are
/// validated before any consumer observes the values.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    concurrency: usize,
    endpoints: EndpointRegistry,
    retry: RetryPolicy,
    content_gateway: String,
    drain_timeout: Duration,
    metrics_interval: Duration,
    use_system_proxy: bool,
}

pub struct WorkerConfigParams {
    pub concurrency: usize,
    /// `(url, config)` pairs; only each URL's origin is kept.
    pub endpoints: Vec<(String, EndpointConfig)>,
    pub retry: RetryPolicy,
    pub content_gateway: String,
    pub drain_timeout: Duration,
    pub metrics_interval: Duration,
    pub use_system_proxy: bool,
}

impl WorkerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: WorkerConfigParams) -> Result<Self> {
        let WorkerConfigParams {
            concurrency,
            endpoints,
            retry,
            content_gateway,
            drain_timeout,
            metrics_interval,
            use_system_proxy,
        } = params;

        let config = Self {
            concurrency,
            endpoints: EndpointRegistry::from_entries(endpoints)?,
            retry,
            content_gateway: content_gateway.trim().to_owned(),
            drain_timeout,
            metrics_interval,
            use_system_proxy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parses the JSON configuration surface:
    ///
    /// ```json
    /// {
    ///   "queue": { "concurrency": 4 },
    ///   "endpoints": {
    ///     "https://eth.example.com": { "requestsPerUnit": 10, "unit": 1000, "timeout": 5000 }
    ///   },
    ///   "retry": { "maxRetries": 3, "minTimeout": 200, "maxTimeout": 2000 },
    ///   "gateway": "https://ipfs.io",
    ///   "drainTimeout": 10000
    /// }
    /// ```
    ///
    /// Every section is optional; durations are milliseconds.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(raw).context("failed to parse worker config")?;

        let mut builder = Self::builder();
        if let Some(concurrency) = raw.queue.and_then(|queue| queue.concurrency) {
            builder = builder.concurrency(concurrency);
        }
        for (url, endpoint) in raw.endpoints.unwrap_or_default() {
            let config = endpoint
                .into_config()
                .with_context(|| format!("invalid endpoint configuration for {url}"))?;
            builder = builder.endpoint(url, config);
        }
        if let Some(retry) = raw.retry {
            if let Some(max_retries) = retry.max_retries {
                builder = builder.max_retries(max_retries);
            }
            if let Some(min_timeout) = retry.min_timeout {
                builder = builder.initial_backoff(Duration::from_millis(min_timeout));
            }
            if let Some(max_timeout) = retry.max_timeout {
                builder = builder.max_backoff(Duration::from_millis(max_timeout));
            }
        }
        if let Some(gateway) = raw.gateway {
            builder = builder.content_gateway(gateway);
        }
        if let Some(drain_timeout) = raw.drain_timeout {
            builder = builder.drain_timeout(Duration::from_millis(drain_timeout));
        }
        if let Some(metrics_interval) = raw.metrics_interval {
            builder = builder.metrics_interval(Duration::from_millis(metrics_interval));
        }

        builder.build()
    }

    /// Maximum number of jobs executing at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Origin-keyed throttling and timeout table.
    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Gateway host used to resolve content-fetch jobs.
    pub fn content_gateway(&self) -> &str {
        &self.content_gateway
    }

    /// How long `terminate` waits for admitted jobs before forcing a stop.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            use_system_proxy: self.use_system_proxy,
            ..TransportOptions::default()
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        self.retry.validate()?;

        if self.drain_timeout.is_zero() {
            bail!("drain_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        validate_gateway(&self.content_gateway)?;

        for (origin, endpoint) in self.endpoints.iter() {
            endpoint
                .validate()
                .with_context(|| format!("invalid endpoint configuration for {origin}"))?;
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkerConfigBuilder {
    concurrency: Option<usize>,
    endpoints: Vec<(String, EndpointConfig)>,
    max_retries: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    content_gateway: Option<String>,
    drain_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    use_system_proxy: Option<bool>,
}

impl WorkerConfigBuilder {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>, config: EndpointConfig) -> Self {
        self.endpoints.push((url.into(), config));
        self
    }

    /// Shorthand for an endpoint allowing `requests` calls per `interval`.
    pub fn rate_limit(self, url: impl Into<String>, requests: u32, interval: Duration) -> Self {
        self.endpoint(
            url,
            EndpointConfig {
                rate: Some(RateLimit::new(requests, interval)),
                default_timeout: None,
            },
        )
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn content_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.content_gateway = Some(gateway.into());
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn use_system_proxy(mut self, enabled: bool) -> Self {
        self.use_system_proxy = Some(enabled);
        self
    }

    pub fn build(self) -> Result<WorkerConfig> {
        let defaults = RetryPolicy::default();
        let params = WorkerConfigParams {
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            endpoints: self.endpoints,
            retry: RetryPolicy {
                max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
                max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            },
            content_gateway: self
                .content_gateway
                .unwrap_or_else(|| DEFAULT_GATEWAY.to_owned()),
            drain_timeout: self
                .drain_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            use_system_proxy: self.use_system_proxy.unwrap_or(true),
        };

        WorkerConfig::new(params)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    queue: Option<RawQueue>,
    endpoints: Option<BTreeMap<String, RawEndpoint>>,
    retry: Option<RawRetry>,
    gateway: Option<String>,
    drain_timeout: Option<u64>,
    metrics_interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawQueue {
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEndpoint {
    requests_per_unit: Option<u32>,
    unit: Option<u64>,
    timeout: Option<u64>,
}

impl RawEndpoint {
    fn into_config(self) -> Result<EndpointConfig> {
        let rate = match (self.requests_per_unit, self.unit) {
            (Some(requests), Some(unit)) => {
                Some(RateLimit::new(requests, Duration::from_millis(unit)))
            }
            (None, None) => None,
            (Some(_), None) => bail!("unit is required when requestsPerUnit is set"),
            (None, Some(_)) => bail!("requestsPerUnit is required when unit is set"),
        };

        Ok(EndpointConfig {
            rate,
            default_timeout: self.timeout.map(Duration::from_millis),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRetry {
    max_retries: Option<usize>,
    min_timeout: Option<u64>,
    max_timeout: Option<u64>,
}

fn validate_gateway(gateway: &str) -> Result<()> {
    let url = Url::parse(gateway).with_context(|| format!("invalid content_gateway {gateway}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("content_gateway must start with http:// or https://");
    }
    Ok(())
}
