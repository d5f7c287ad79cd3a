//! Content-addressed fetches through a fixed IPFS gateway.

use crate::executor::http::HttpExecutor;
use crate::job::{JobError, JobOptions};
use crate::throttle::AttemptScope;
use crate::transport::HttpRequest;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde_json::Value;

pub const DEFAULT_GATEWAY: &str = "https://ipfs.io";

#[derive(Debug, Clone)]
pub struct ContentExecutor {
    http: HttpExecutor,
    gateway: String,
}

impl ContentExecutor {
    pub fn new(http: HttpExecutor, gateway: &str) -> Result<Self> {
        let parsed = Url::parse(gateway).with_context(|| format!("invalid gateway {gateway}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("gateway must be an http(s) URL, got {gateway}");
        }

        Ok(Self {
            http,
            gateway: gateway.trim_end_matches('/').to_owned(),
        })
    }

    /// Maps `ipfs://<cid>[/path]`, `/ipfs/<cid>[/path]` or a bare CID onto the
    /// gateway.
    pub fn resolve(&self, uri: &str) -> Result<String, JobError> {
        let uri = uri.trim();
        let path = if let Some(rest) = uri.strip_prefix("ipfs://") {
            rest
        } else if let Some(rest) = uri.strip_prefix("/ipfs/") {
            rest
        } else if !uri.contains("://") && !uri.starts_with('/') {
            uri
        } else {
            return Err(JobError::InvalidJob(format!(
                "unsupported content uri \"{uri}\""
            )));
        };

        let cid = path.split('/').next().unwrap_or_default();
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(JobError::InvalidJob(format!(
                "content uri \"{uri}\" does not contain a valid CID"
            )));
        }

        Ok(format!("{}/ipfs/{path}", self.gateway))
    }

    /// GETs the already resolved gateway URL. The job's headers are kept, its
    /// method and body are not.
    pub async fn execute(
        &self,
        options: &JobOptions,
        url: &str,
        scope: &AttemptScope,
    ) -> Result<Value, JobError> {
        let request = HttpRequest::get(url).with_headers(options.headers.as_ref());
        self.http.send(&request, scope).await
    }
}
