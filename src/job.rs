//! Job envelope model, schema validation, and the per-job error taxonomy shared
//! by every stage of the dispatch engine.

pub mod envelope;
pub mod error;
pub mod schema;

pub use envelope::{JobEnvelope, JobKind, JobOptions, ENGINE_VERSION};
pub use error::{JobError, ValidationError};
pub use schema::{EnvelopeSchema, SchemaValidator, Validator};
