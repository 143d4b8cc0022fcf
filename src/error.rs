//! Error taxonomy for the coordination core, plus the HTTP mapping used by
//! the read API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the matching engine, the ride state machine and the
/// persistence gateway.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// Malformed or missing fields in an inbound operation. Rejected before
    /// any state is touched.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced ride/driver/rider does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested state change is illegal from the current state, or the
    /// caller has no authority over the ride.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Matching found no eligible candidate within the radius. A normal
    /// outcome surfaced to the rider, not a failure.
    #[error("no driver available within {radius_km} km")]
    NoDriverAvailable { radius_km: f64 },

    /// The driver was concurrently reserved by another request, or the offer
    /// is no longer held for this driver.
    #[error("reservation conflict: {0}")]
    ReservationConflict(String),

    /// The external route/fare estimation service failed.
    #[error("route estimation failed: {0}")]
    Estimation(String),

    /// A durable write failed. When this happens after a live state change
    /// was already applied it marks a gap between the live and durable views
    /// and is logged for reconciliation.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Persistence(err.to_string())
    }
}

impl CoreError {
    /// Short machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidTransition(_) => "invalid_transition",
            CoreError::NoDriverAvailable { .. } => "no_driver_available",
            CoreError::ReservationConflict(_) => "reservation_conflict",
            CoreError::Estimation(_) => "estimation_failed",
            CoreError::Persistence(_) => "persistence_failure",
        }
    }
}

/// Error wrapper for the axum handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Core(CoreError::Persistence(err.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(err) => {
                let status = match err {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::InvalidTransition(_) => StatusCode::CONFLICT,
                    CoreError::NoDriverAvailable { .. } => StatusCode::NOT_FOUND,
                    CoreError::ReservationConflict(_) => StatusCode::CONFLICT,
                    CoreError::Estimation(_) => StatusCode::BAD_GATEWAY,
                    CoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            CoreError::Validation("x".into()).code(),
            "validation_error"
        );
        assert_eq!(
            CoreError::NoDriverAvailable { radius_km: 5.0 }.code(),
            "no_driver_available"
        );
        assert_eq!(
            CoreError::ReservationConflict("x".into()).code(),
            "reservation_conflict"
        );
    }

    #[test]
    fn test_no_driver_available_message_carries_radius() {
        let err = CoreError::NoDriverAvailable { radius_km: 5.0 };
        assert_eq!(err.to_string(), "no driver available within 5 km");
    }
}
