//! Server error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booking::BookingError;
use thiserror::Error;

/// Startup and shutdown failures of the server binary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] distributed_lock::LockError),

    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    #[error("Metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-level error that maps to an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Booking rejection or failure.
    Booking(BookingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Booking(err) => booking_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn booking_error_to_response(err: BookingError) -> (StatusCode, String) {
    let status = match &err {
        BookingError::SeatNotFound(_)
        | BookingError::ReservationNotFound(_)
        | BookingError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        BookingError::SeatUnavailable(_)
        | BookingError::ReservationAlreadyHeld(_)
        | BookingError::InvalidReservationState { .. } => StatusCode::CONFLICT,
        BookingError::ReservationExpired(_) => StatusCode::GONE,
        BookingError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        _ if err.is_retriable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, ReservationId, SeatId, WalletId};

    use super::*;

    fn status_of(err: BookingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn business_rejections_map_to_client_errors() {
        assert_eq!(
            status_of(BookingError::SeatUnavailable(SeatId::new(1))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BookingError::ReservationExpired(ReservationId::new(1))),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(BookingError::InsufficientBalance {
                wallet_id: WalletId::new(1),
                required: Money::from_minor(100),
            }),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn lock_timeout_is_service_unavailable() {
        assert_eq!(
            status_of(BookingError::LockTimeout {
                key: "seat:1".to_string()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
