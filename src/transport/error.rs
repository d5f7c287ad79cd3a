use std::fmt;
use std::time::Duration;

/// Classified outcome of a failed request attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The cancellation signal fired while the request was in flight.
    Aborted {
        url: String,
        method: String,
        timeout: Option<Duration>,
    },
    /// The server answered with a status of 400 or above.
    Status {
        url: String,
        method: String,
        body: Option<String>,
        status: u16,
        answer: String,
    },
    /// The request never produced a response (DNS, connect, reset, ...).
    Network {
        url: String,
        method: String,
        message: String,
    },
    /// A response promised JSON but the body did not parse.
    Decode { answer: String, message: String },
    /// The request could not be built from the job's options.
    InvalidRequest { message: String },
}

impl TransportError {
    /// 429, 5xx and connection failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Network { .. } => true,
            TransportError::Aborted { .. }
            | TransportError::Decode { .. }
            | TransportError::InvalidRequest { .. } => false,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, TransportError::Aborted { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Attaches the deadline that triggered an abort, if any.
    pub fn with_timeout(self, deadline: Option<Duration>) -> Self {
        match self {
            TransportError::Aborted {
                url,
                method,
                timeout,
            } => TransportError::Aborted {
                url,
                method,
                timeout: timeout.or(deadline),
            },
            other => other,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Aborted {
                url,
                method,
                timeout,
            } => {
                write!(
                    f,
                    "AbortError: request to url \"{url}\" with method \"{method}\" was aborted"
                )?;
                if let Some(timeout) = timeout {
                    write!(f, " after {}ms", timeout.as_millis())?;
                }
                Ok(())
            }
            TransportError::Status {
                url,
                method,
                body,
                status,
                answer,
            } => write!(
                f,
                "HttpError: Request to url \"{url}\" with method \"{method}\" and body \"{}\" \
                 unsuccessful with status: {status} and answer: \"{answer}\"",
                body.as_deref().unwrap_or_default()
            ),
            TransportError::Network {
                url,
                method,
                message,
            } => write!(
                f,
                "FetchError: request to url \"{url}\" with method \"{method}\" failed: {message}"
            ),
            TransportError::Decode { answer, message } => write!(
                f,
                "ParseError: Encountered error when trying to parse JSON body result: \
                 \"{answer}\", error: \"{message}\""
            ),
            TransportError::InvalidRequest { message } => {
                write!(f, "InvalidJobError: {message}")
            }
        }
    }
}

impl std::error::Error for TransportError {}
