//! Envelope exchanged with callers. The engine only ever writes `results` and
//! `error`; every other field is carried through exactly as received.

use crate::job::error::JobError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Message schema version compiled into this worker. Envelopes carrying any
/// other version are rejected during validation.
pub const ENGINE_VERSION: &str = "0.0.1";

/// Closed set of job kinds understood by the dispatcher.
///
/// Legacy wire names (`json-rpc`, `https`, `exit`) map onto their current
/// counterparts; anything unrecognised lands in [`JobKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    Rpc,
    Http,
    Graphql,
    ContentFetch,
    Terminate,
    Other(String),
}

impl JobKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "rpc" | "json-rpc" => JobKind::Rpc,
            "http" | "https" => JobKind::Http,
            "graphql" => JobKind::Graphql,
            "content-fetch" => JobKind::ContentFetch,
            "terminate" | "exit" => JobKind::Terminate,
            other => JobKind::Other(other.to_owned()),
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            JobKind::Rpc => "rpc",
            JobKind::Http => "http",
            JobKind::Graphql => "graphql",
            JobKind::ContentFetch => "content-fetch",
            JobKind::Terminate => "terminate",
            JobKind::Other(name) => name.as_str(),
        }
    }

    /// Kinds that take a rate-limiter token for their destination origin
    /// before every network attempt.
    pub fn is_throttled(&self) -> bool {
        matches!(self, JobKind::Rpc | JobKind::Http | JobKind::ContentFetch)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-specific request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Per-job timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}

/// Unit of work and of result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(rename = "type")]
    pub job_type: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commissioner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JobOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    #[serde(default)]
    pub results: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobEnvelope {
    /// Creates a pending envelope for the current engine version.
    pub fn new(kind: JobKind, options: JobOptions) -> Self {
        Self {
            job_type: kind.as_str().to_owned(),
            version: ENGINE_VERSION.to_owned(),
            commissioner: None,
            options: Some(options),
            method: None,
            params: None,
            results: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Shorthand for a `terminate` control message.
    pub fn terminate() -> Self {
        Self {
            options: None,
            ..Self::new(JobKind::Terminate, JobOptions::default())
        }
    }

    pub fn with_commissioner(mut self, commissioner: impl Into<String>) -> Self {
        self.commissioner = Some(commissioner.into());
        self
    }

    pub fn with_rpc_call(mut self, method: impl Into<String>, params: Vec<Value>) -> Self {
        self.method = Some(method.into());
        self.params = Some(params);
        self
    }

    pub fn kind(&self) -> JobKind {
        JobKind::parse(&self.job_type)
    }

    pub fn options(&self) -> &JobOptions {
        static EMPTY: std::sync::OnceLock<JobOptions> = std::sync::OnceLock::new();
        self.options
            .as_ref()
            .unwrap_or_else(|| EMPTY.get_or_init(JobOptions::default))
    }

    pub fn is_pending(&self) -> bool {
        self.results.is_none() && self.error.is_none()
    }

    /// Attaches the outcome, guaranteeing exactly one of `results`/`error` is
    /// set afterwards.
    pub fn complete(mut self, outcome: Result<Value, JobError>) -> Self {
        match outcome {
            Ok(value) => {
                self.results = Some(value);
                self.error = None;
            }
            Err(err) => {
                self.results = None;
                self.error = Some(err.to_string());
            }
        }
        self
    }

    pub fn fail(self, err: JobError) -> Self {
        self.complete(Err(err))
    }

    /// Serialises into the wire shape, falling back to an error-only object if
    /// a carried-through value cannot be represented.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            serde_json::json!({
                "type": self.job_type,
                "version": self.version,
                "results": Value::Null,
                "error": format!("ParseError: failed to serialise envelope: {err}"),
            })
        })
    }
}
