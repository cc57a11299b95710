//! Maps [`RelayError`] to an `axum` response (spec.md §7).
//!
//! Neither `RelayError` nor `IntoResponse` lives in this crate, so the
//! mapping is expressed on a local newtype rather than a foreign impl.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::RelayError;

/// Wraps a [`RelayError`] for `axum`'s `IntoResponse`.
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let RelayError::Internal(ref cause) = self.0 {
            tracing::error!(error = %cause, "internal error");
        }
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError(RelayError::NotFound { message: "x".into(), available_clients: None });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
