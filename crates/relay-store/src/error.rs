//! Coordination store error types.

use thiserror::Error;

/// Errors from coordination store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store connection failed.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The requested operation failed against a reachable store.
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Result type for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;
