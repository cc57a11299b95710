//! The relay's error taxonomy (spec.md §7).
//!
//! Every HTTP handler's error path funnels into [`RelayError`]; the
//! HTTP surface (component H) is the only place that turns a variant
//! into a status code and JSON body, so the mapping lives there. This
//! type only distinguishes the kinds the core needs to distinguish.

use serde_json::Value;
use thiserror::Error;

/// Errors the relay core distinguishes, one-to-one with spec.md §7.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or ill-typed parameter.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Human-readable explanation.
        message: String,
        /// Optional `howToUse` hint surfaced to the caller.
        how_to_use: Option<String>,
    },

    /// Missing or non-matching credential.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Credential present but not the owner of the resource.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// `worldId` not connected, session absent, or uuid unknown.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable explanation.
        message: String,
        /// Live world ids to suggest to the caller, if any.
        available_clients: Option<Vec<String>>,
    },

    /// Daily or monthly counter exceeded.
    #[error("quota exceeded")]
    QuotaExceeded,

    /// Duplicate world id on upgrade, or user registration collision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No reply from the world within the operation deadline.
    #[error("upstream timed out: {operation}")]
    UpstreamTimeout {
        /// The operation that timed out, e.g. `"Search"`.
        operation: String,
    },

    /// Cross-replica forward returned 5xx or a connection error.
    #[error("forward failed: {0}")]
    ForwardFailure(String),

    /// Gateway-level timeout (e.g. handshake redemption poll).
    #[error("gateway timed out")]
    GatewayTimeout,

    /// The script-safety filter rejected a payload.
    #[error("script rejected: {suggestion}")]
    ScriptRejected {
        /// Remediation suggestion surfaced to the caller.
        suggestion: String,
    },

    /// Unexpected failure; the cause is logged, never echoed to the caller.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// The HTTP status code this error maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } | Self::ScriptRejected { .. } => 400,
            Self::Unauthenticated => 401,
            Self::Unauthorized(_) => 403,
            Self::NotFound { .. } => 404,
            Self::UpstreamTimeout { .. } => 408,
            Self::Conflict(_) => 409,
            Self::QuotaExceeded => 429,
            Self::Internal(_) => 500,
            Self::ForwardFailure(_) => 502,
            Self::GatewayTimeout => 504,
        }
    }

    /// JSON error body: `{error, message?, ...hints}`.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::InvalidInput { message, how_to_use } => serde_json::json!({
                "error": "Invalid input",
                "message": message,
                "howToUse": how_to_use,
            }),
            Self::NotFound { message, available_clients } => serde_json::json!({
                "error": "Not found",
                "message": message,
                "availableClients": available_clients,
            }),
            Self::ScriptRejected { suggestion } => serde_json::json!({
                "error": "Script contains forbidden patterns",
                "suggestion": suggestion,
            }),
            Self::UpstreamTimeout { operation } => serde_json::json!({
                "error": format!("{operation} request timed out"),
            }),
            Self::Internal(_) => serde_json::json!({ "error": "Internal server error" }),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(
            RelayError::InvalidInput { message: "x".into(), how_to_use: None }.status_code(),
            400
        );
        assert_eq!(RelayError::Unauthenticated.status_code(), 401);
        assert_eq!(RelayError::Unauthorized("x".into()).status_code(), 403);
        assert_eq!(
            RelayError::NotFound { message: "x".into(), available_clients: None }.status_code(),
            404
        );
        assert_eq!(RelayError::UpstreamTimeout { operation: "Search".into() }.status_code(), 408);
        assert_eq!(RelayError::Conflict("x".into()).status_code(), 409);
        assert_eq!(RelayError::QuotaExceeded.status_code(), 429);
        assert_eq!(RelayError::Internal(anyhow::anyhow!("boom")).status_code(), 500);
        assert_eq!(RelayError::ForwardFailure("x".into()).status_code(), 502);
        assert_eq!(RelayError::GatewayTimeout.status_code(), 504);
    }

    #[test]
    fn internal_error_never_leaks_cause_in_body() {
        let err = RelayError::Internal(anyhow::anyhow!("super secret stack trace"));
        let body = err.body();
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("super secret"));
    }

    #[test]
    fn not_found_surfaces_available_clients_hint() {
        let err = RelayError::NotFound {
            message: "world w1 not connected".into(),
            available_clients: Some(vec!["w2".into(), "w3".into()]),
        };
        let body = err.body();
        assert_eq!(body["availableClients"][0], "w2");
    }
}
