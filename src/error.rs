//! Error types surfaced to tool callers.
//!
//! Every error carries a stable wire code (see [`Error::code`]) that the
//! protocol layer places in the `error.code` field of a response. Handlers
//! never terminate the process; the queue worker converts errors into
//! failed jobs.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty content/query/topic, missing required parameter, malformed
    /// metadata JSON, or an unknown enum value in a request.
    #[error("{0}")]
    InvalidInput(String),

    /// Document or job id unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// File read, directory walk, or filesystem failure.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    /// Database open/read/write failure.
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    /// The embedder rejected the text or returned the wrong dimension.
    #[error("embedding failure: {0}")]
    Embedding(String),

    /// A remote embedding backend could not be reached.
    #[error("embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Serialization failures, handler panics, and other internal faults.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the tool protocol.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::Io(_) | Error::Database(_) => "io_failure",
            Error::Embedding(_) => "embedding_failure",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Shorthand for an [`Error::InvalidInput`] with a formatted message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization failure: {err}"))
    }
}
