//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while setting up logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log level/filter directive couldn't be parsed.
    #[error("invalid log filter directive: {0}")]
    InvalidFilter(String),

    /// The global tracing subscriber was already installed.
    #[error("global tracing subscriber already set")]
    AlreadyInitialized,
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
