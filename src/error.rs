//! Error types for the table batch writer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for writer operations
pub type Result<T> = std::result::Result<T, WriterError>;

/// Writer error types
#[derive(Error, Debug)]
pub enum WriterError {
    /// Entity rejected at enqueue (empty key, not an object, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store collaborator failure outside of a flush (e.g. provisioning)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every chunk of a flush failed
    #[error("Flush failed: all {failed_chunks} chunks failed")]
    FlushFailed { failed_chunks: usize },

    /// Some chunks of a flush failed
    #[error("Partial flush failure: {failed_chunks} of {total_chunks} chunks failed")]
    PartialFlush {
        failed_chunks: usize,
        total_chunks: usize,
    },
}

impl From<serde_json::Error> for WriterError {
    fn from(err: serde_json::Error) -> Self {
        WriterError::Serialization(err.to_string())
    }
}

/// Errors surfaced by a table store when a batch is submitted.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum StoreError {
    /// Entity already exists (insert)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Entity does not exist (delete, merge, replace)
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// ETag mismatch
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed batch (mixed partitions, too many operations, ...)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Target table has not been provisioned
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Attempt exceeded the request timeout
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Store temporarily unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store is shedding load
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Store-side internal failure
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether another attempt of the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Timeout(_)
            | StoreError::Unavailable(_)
            | StoreError::Throttled(_)
            | StoreError::Internal(_) => true,

            StoreError::Conflict(_)
            | StoreError::NotFound(_)
            | StoreError::PreconditionFailed(_)
            | StoreError::BadRequest(_)
            | StoreError::TableNotFound(_) => false,
        }
    }
}
