//! Per-job error taxonomy. The `Display` form of [`JobError`] is exactly what
//! lands in `envelope.error`, prefixed with the error kind so callers can
//! classify failures without parsing free text.

use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("job must be a JSON object")]
    NotAnObject,
    #[error("missing required field `{field}`")]
    MissingField { field: String },
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("field `{field}` is invalid: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Difference in versions. Worker: \"{expected}\", Message: \"{found}\"")]
    VersionMismatch { expected: String, found: String },
}

impl ValidationError {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub(crate) fn wrong_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.into(),
            expected,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("ValidationError: {0}")]
    Validation(#[from] ValidationError),

    #[error("NotImplementedError: job type \"{0}\" is not implemented")]
    NotImplemented(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("RpcError: {0}")]
    Rpc(String),

    #[error("GraphQLError: {0}")]
    Graphql(String),

    #[error("InvalidJobError: {0}")]
    InvalidJob(String),

    #[error("PanicError: executor panicked: {0}")]
    Panicked(String),

    #[error("TerminatedError: {0}")]
    Terminated(&'static str),
}

impl JobError {
    /// True for timeouts and forced-stop cancellations.
    pub fn is_abort(&self) -> bool {
        matches!(self, JobError::Transport(err) if err.is_abort())
    }
}
