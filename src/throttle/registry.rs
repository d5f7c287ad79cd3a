//! Origin-keyed endpoint table built once at startup and read-only afterwards.

use crate::job::JobError;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;

/// Token-bucket parameters for one origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_per_interval: u32,
    pub interval: Duration,
}

impl RateLimit {
    pub fn new(requests_per_interval: u32, interval: Duration) -> Self {
        Self {
            requests_per_interval,
            interval,
        }
    }
}

/// Throttling and timeout defaults for one origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    pub rate: Option<RateLimit>,
    pub default_timeout: Option<Duration>,
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.rate {
            if rate.requests_per_interval == 0 {
                bail!("requestsPerUnit must be greater than 0");
            }
            if rate.interval.is_zero() {
                bail!("unit must be greater than 0");
            }
        }
        if matches!(self.default_timeout, Some(timeout) if timeout.is_zero()) {
            bail!("timeout must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, EndpointConfig>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from `(url, config)` pairs; only each URL's origin is
    /// kept as the key.
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, EndpointConfig)>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for (url, config) in entries {
            registry.insert(url.as_ref(), config)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, url: &str, config: EndpointConfig) -> Result<()> {
        config
            .validate()
            .with_context(|| format!("invalid endpoint configuration for {url}"))?;
        let origin = parse_origin(url)?;
        self.endpoints.insert(origin, config);
        Ok(())
    }

    pub fn get(&self, origin: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(origin)
    }

    pub fn default_timeout(&self, origin: &str) -> Option<Duration> {
        self.get(origin).and_then(|config| config.default_timeout)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EndpointConfig)> {
        self.endpoints
            .iter()
            .map(|(origin, config)| (origin.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Scheme, host and port of `url` in serialised form, e.g.
/// `https://example.com` or `http://127.0.0.1:8080`.
pub fn resolve_origin(url: &str) -> Result<String, JobError> {
    parse_origin(url).map_err(|err| JobError::InvalidJob(format!("{err:#}")))
}

fn parse_origin(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim()).with_context(|| format!("invalid URL \"{url}\""))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("URL \"{url}\" must start with http:// or https://");
    }
    Ok(parsed.origin().ascii_serialization())
}
