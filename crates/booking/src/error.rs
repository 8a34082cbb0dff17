//! Booking error types.

use common::{Money, ReservationId, ScheduleId, SeatId, UserId, WalletId};
use distributed_lock::LockError;
use store::{ReservationStatus, StoreError};
use thiserror::Error;

/// Errors surfaced by claim, payment and cancellation.
///
/// Callers can tell "retry later" ([`BookingError::is_retriable`]) from "pick
/// another seat" and "top up the wallet" by the variant alone.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The per-seat or per-reservation lock stayed busy for the whole wait budget.
    #[error("Lock {key} not acquired within the wait budget")]
    LockTimeout { key: String },

    #[error("Seat not found: {0}")]
    SeatNotFound(SeatId),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("No wallet for user {0}")]
    WalletNotFound(UserId),

    /// The seat is already held or sold.
    #[error("Seat {0} is not available")]
    SeatUnavailable(SeatId),

    #[error("Seat {0} already has a reservation on hold")]
    ReservationAlreadyHeld(SeatId),

    /// The hold ran out before payment. The sweeper moves it to EXPIRED.
    #[error("Hold on reservation {0} has expired")]
    ReservationExpired(ReservationId),

    #[error("Reservation {id} is {status}, expected HOLD")]
    InvalidReservationState {
        id: ReservationId,
        status: ReservationStatus,
    },

    #[error("Insufficient balance in wallet {wallet_id}: {required} required")]
    InsufficientBalance { wallet_id: WalletId, required: Money },

    /// The schedule price does not fit in minor units.
    #[error("Price of schedule {0} is out of range")]
    InvalidPrice(ScheduleId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Lock backend failure other than a timeout.
    #[error("Lock error: {0}")]
    Lock(LockError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<LockError> for BookingError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { key, .. } => BookingError::LockTimeout { key },
            other => BookingError::Lock(other),
        }
    }
}

impl BookingError {
    /// Returns true if the same request may succeed when retried unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BookingError::LockTimeout { .. }
                | BookingError::Lock(_)
                | BookingError::Redis(_)
                | BookingError::Store(StoreError::Database(_))
        )
    }

    /// Short label used as the `outcome` of booking metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::LockTimeout { .. } => "lock_timeout",
            BookingError::SeatNotFound(_) => "seat_not_found",
            BookingError::ReservationNotFound(_) => "reservation_not_found",
            BookingError::WalletNotFound(_) => "wallet_not_found",
            BookingError::SeatUnavailable(_) => "seat_unavailable",
            BookingError::ReservationAlreadyHeld(_) => "already_held",
            BookingError::ReservationExpired(_) => "expired",
            BookingError::InvalidReservationState { .. } => "invalid_state",
            BookingError::InsufficientBalance { .. } => "insufficient_balance",
            BookingError::InvalidPrice(_) => "invalid_price",
            BookingError::Store(_) => "store_error",
            BookingError::Lock(_) => "lock_error",
            BookingError::Redis(_) => "redis_error",
            BookingError::Serialization(_) => "serialization_error",
        }
    }
}

/// Convenience type alias for booking results.
pub type Result<T> = std::result::Result<T, BookingError>;
