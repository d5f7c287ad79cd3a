//! Structural validation of inbound jobs. Runs on the raw JSON value before a
//! job is admitted to the queue so malformed input never occupies a slot.

use crate::job::envelope::{JobKind, ENGINE_VERSION};
use crate::job::error::ValidationError;
use reqwest::Url;
use serde_json::{Map, Value};
use std::sync::Arc;

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Shape check for a raw job; implementations must not consider the version.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, job: &Value) -> Result<(), ValidationError>;
}

/// Built-in schema covering every [`JobKind`].
///
/// Unknown job types only need the common fields so that they reach the
/// dispatcher and fail there as not implemented.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeSchema;

impl SchemaValidator for EnvelopeSchema {
    fn validate(&self, job: &Value) -> Result<(), ValidationError> {
        let object = job.as_object().ok_or(ValidationError::NotAnObject)?;

        let job_type = required_str(object, "type", "type")?;
        required_str(object, "version", "version")?;
        optional_str(object, "commissioner", "commissioner")?;
        ensure_pending(object, "results")?;
        ensure_pending(object, "error")?;

        match JobKind::parse(job_type) {
            JobKind::Terminate | JobKind::Other(_) => Ok(()),
            JobKind::Http => {
                let options = required_options(object)?;
                required_url(options, "options.url")?;
                let method = required_str(options, "method", "options.method")?;
                if !HTTP_METHODS.contains(&method) {
                    return Err(ValidationError::invalid(
                        "options.method",
                        format!("unsupported HTTP method \"{method}\""),
                    ));
                }
                common_request_options(options)
            }
            JobKind::Graphql => {
                let options = required_options(object)?;
                required_url(options, "options.url")?;
                required_str(options, "body", "options.body")?;
                common_request_options(options)
            }
            JobKind::Rpc => {
                let options = required_options(object)?;
                required_url(options, "options.url")?;
                let method = required_str(object, "method", "method")?;
                if method.trim().is_empty() {
                    return Err(ValidationError::invalid("method", "cannot be empty"));
                }
                match object.get("params") {
                    Some(Value::Array(_)) => {}
                    Some(_) => return Err(ValidationError::wrong_type("params", "an array")),
                    None => return Err(ValidationError::missing("params")),
                }
                common_request_options(options)
            }
            JobKind::ContentFetch => {
                let options = required_options(object)?;
                let uri = required_str(options, "uri", "options.uri")?;
                if uri.trim().is_empty() {
                    return Err(ValidationError::invalid("options.uri", "cannot be empty"));
                }
                common_request_options(options)
            }
        }
    }
}

/// Schema check followed by the engine version check.
#[derive(Clone)]
pub struct Validator {
    schema: Arc<dyn SchemaValidator>,
    version: &'static str,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Arc::new(EnvelopeSchema))
    }
}

impl Validator {
    pub fn new(schema: Arc<dyn SchemaValidator>) -> Self {
        Self {
            schema,
            version: ENGINE_VERSION,
        }
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn validate(&self, job: &Value) -> Result<(), ValidationError> {
        self.schema.validate(job)?;

        let found = job
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::missing("version"))?;
        if found != self.version {
            return Err(ValidationError::VersionMismatch {
                expected: self.version.to_owned(),
                found: found.to_owned(),
            });
        }
        Ok(())
    }
}

fn required_str<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<&'a str, ValidationError> {
    match object.get(key) {
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(ValidationError::wrong_type(field, "a string")),
        None => Err(ValidationError::missing(field)),
    }
}

fn optional_str(object: &Map<String, Value>, key: &str, field: &str) -> Result<(), ValidationError> {
    match object.get(key) {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(ValidationError::wrong_type(field, "a string")),
    }
}

fn ensure_pending(object: &Map<String, Value>, key: &str) -> Result<(), ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(_) => Err(ValidationError::invalid(key, "must be null on submission")),
    }
}

fn required_options(object: &Map<String, Value>) -> Result<&Map<String, Value>, ValidationError> {
    match object.get("options") {
        Some(Value::Object(options)) => Ok(options),
        Some(_) => Err(ValidationError::wrong_type("options", "an object")),
        None => Err(ValidationError::missing("options")),
    }
}

fn required_url(options: &Map<String, Value>, field: &str) -> Result<(), ValidationError> {
    let raw = required_str(options, "url", field)?;
    let url = Url::parse(raw).map_err(|err| ValidationError::invalid(field, err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::invalid(field, "must be an http:// or https:// URL"));
    }
    Ok(())
}

fn common_request_options(options: &Map<String, Value>) -> Result<(), ValidationError> {
    optional_str(options, "body", "options.body")?;

    match options.get("headers") {
        None => {}
        Some(Value::Object(headers)) => {
            if let Some((name, _)) = headers.iter().find(|(_, value)| !value.is_string()) {
                return Err(ValidationError::wrong_type(
                    format!("options.headers.{name}"),
                    "a string",
                ));
            }
        }
        Some(_) => return Err(ValidationError::wrong_type("options.headers", "an object")),
    }

    match options.get("timeout") {
        None => Ok(()),
        Some(value) if value.as_u64().is_some() => Ok(()),
        Some(_) => Err(ValidationError::wrong_type(
            "options.timeout",
            "a non-negative integer of milliseconds",
        )),
    }
}
