//! Closed error-kind set shared across every component.
//!
//! Every public operation in this crate returns `EngineResult<T>`. Component
//! modules define their own local error enums (`StoreError`, `IngestError`,
//! ...) and convert into `EngineError` at their boundary via `#[from]`.

use thiserror::Error;

/// Result type for every public operation in this crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// The closed error-kind set shared by every public operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, offset violations, empty selection, unknown content_type.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Referenced entity does not exist under the current scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name collision, duplicate deterministic ID, state-machine violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Tenant isolation, demo-mode write, denylisted host.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Backing store or dependency unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Deadline expired or explicit cancellation.
    #[error("canceled")]
    Canceled,

    /// Everything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Invalid(_) => 400,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Forbidden(_) => 403,
            EngineError::Unavailable(_) => 503,
            EngineError::Canceled => 499,
            EngineError::Internal(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => EngineError::NotFound(e.to_string()),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Internal(format!("serialization error: {e}"))
    }
}
