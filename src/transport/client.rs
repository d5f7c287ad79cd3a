//! Retrying HTTP request primitive shared by every executor.
//!
//! Each attempt first passes its [`AttemptScope`] (rate-limiter token, then a
//! fresh deadline), issues one request, reads the whole body as text,
//! classifies the status, and decodes the body as JSON with a plaintext
//! fallback.

use crate::throttle::AttemptScope;
use crate::transport::error::TransportError;
use crate::transport::metrics::{TransportMetrics, TransportMetricsSnapshot};
use crate::transport::options::{RetryPolicy, TransportOptions};
use crate::transport::retry::{retry_with_backoff, RetryContext};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A fully resolved request, independent of the job kind that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn with_headers(mut self, headers: Option<&BTreeMap<String, String>>) -> Self {
        if let Some(headers) = headers {
            self.headers
                .extend(headers.iter().map(|(name, value)| (name.clone(), value.clone())));
        }
        self
    }

    /// Sets `name` unless a header with the same case-insensitive name exists.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        let present = self
            .headers
            .keys()
            .any(|existing| existing.eq_ignore_ascii_case(name));
        if !present {
            self.headers.insert(name.to_owned(), value.to_owned());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    metrics: Arc<TransportMetrics>,
}

impl Transport {
    pub fn new(options: &TransportOptions) -> Result<Self> {
        let mut builder = Client::builder().user_agent(options.user_agent.as_str());
        if !options.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            client,
            metrics: Arc::new(TransportMetrics::default()),
        })
    }

    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Performs `request`, retrying 429/5xx/connection failures according to
    /// `policy` and bailing on anything else. Every attempt is gated by
    /// `scope`, so retries are throttled and timed individually. Cancellation
    /// surfaces as [`TransportError::Aborted`] and is never retried.
    pub async fn attempt_request(
        &self,
        request: &HttpRequest,
        scope: &AttemptScope,
        policy: &RetryPolicy,
    ) -> Result<Value, TransportError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidRequest {
                message: format!("unsupported HTTP method \"{}\"", request.method),
            })?;
        let headers = build_headers(&request.headers)?;

        let context = RetryContext::new(policy, &request.url, &request.method);
        retry_with_backoff(
            context,
            policy,
            scope.shutdown(),
            |_| self.attempt_once(request, &method, &headers, scope),
            |_, _, _| self.metrics.record_retry(),
        )
        .await
    }

    async fn attempt_once(
        &self,
        request: &HttpRequest,
        method: &Method,
        headers: &HeaderMap,
        scope: &AttemptScope,
    ) -> Result<Value, TransportError> {
        let Some(deadline) = scope.begin_attempt().await else {
            self.metrics.record_abort(Duration::ZERO);
            return Err(aborted(request));
        };
        let cancel = deadline.token();

        let mut builder = self
            .client
            .request(method.clone(), request.url.as_str())
            .headers(headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let answer = response.text().await?;
            Ok::<_, reqwest::Error>((status, content_type, answer))
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.metrics.record_abort(start.elapsed());
                return Err(aborted(request).with_timeout(scope.fired_timeout(&deadline)));
            }
            outcome = exchange => outcome,
        };

        let (status, content_type, answer) = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                self.metrics.record_failure(start.elapsed());
                return Err(TransportError::Network {
                    url: request.url.clone(),
                    method: request.method.clone(),
                    message: error_chain(&err),
                });
            }
        };

        if status >= 400 {
            self.metrics.record_failure(start.elapsed());
            return Err(TransportError::Status {
                url: request.url.clone(),
                method: request.method.clone(),
                body: request.body.clone(),
                status,
                answer,
            });
        }

        self.metrics.record_success(start.elapsed());
        tracing::debug!(
            url = request.url.as_str(),
            method = request.method.as_str(),
            status,
            latency_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );
        decode_body(answer, content_type.as_deref())
    }
}

/// JSON when the text parses; otherwise plaintext, unless the server declared
/// a JSON content type.
fn decode_body(answer: String, content_type: Option<&str>) -> Result<Value, TransportError> {
    match serde_json::from_str::<Value>(&answer) {
        Ok(value) => Ok(value),
        Err(err) => {
            let promised_json = content_type
                .map(|value| value.to_ascii_lowercase().contains("json"))
                .unwrap_or(false);
            if promised_json {
                Err(TransportError::Decode {
                    answer,
                    message: err.to_string(),
                })
            } else {
                Ok(Value::String(answer))
            }
        }
    }
}

fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| TransportError::InvalidRequest {
                message: format!("invalid header name \"{name}\""),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| TransportError::InvalidRequest {
                message: format!("invalid value for header \"{name}\""),
            })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn aborted(request: &HttpRequest) -> TransportError {
    TransportError::Aborted {
        url: request.url.clone(),
        method: request.method.clone(),
        timeout: None,
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
