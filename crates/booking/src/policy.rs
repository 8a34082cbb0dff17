//! Booking policy values and lock key naming.

use chrono::Duration;
use common::{ReservationId, SeatId};

/// Policy applied by the claim operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// How long a claimed seat stays on hold awaiting payment.
    pub hold_duration: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_duration: Duration::minutes(10),
        }
    }
}

impl BookingPolicy {
    pub fn with_hold_duration(hold_duration: Duration) -> Self {
        Self { hold_duration }
    }
}

/// Lock key serializing every claim on one seat.
pub fn seat_lock_key(seat_id: SeatId) -> String {
    format!("seat:{seat_id}")
}

/// Lock key serializing payment and cancellation of one reservation.
pub fn reservation_lock_key(reservation_id: ReservationId) -> String {
    format!("reservation:{reservation_id}")
}
