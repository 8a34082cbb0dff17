//! Signals emitted after a booking transaction has committed.

use chrono::{DateTime, Utc};
use common::{Money, PaymentId, ReservationId, ScheduleId, UserId};
use serde::{Deserialize, Serialize};
use store::{Payment, Reservation};

/// Emitted once per newly recorded payment, after its commit.
///
/// Never emitted for an idempotent replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub reservation_id: ReservationId,
    pub schedule_id: ScheduleId,
    pub amount: Money,
    pub idempotency_token: String,
    pub approved_at: DateTime<Utc>,
}

impl PaymentCompleted {
    pub fn new(payment: &Payment, reservation: &Reservation) -> Self {
        Self {
            payment_id: payment.id,
            user_id: payment.user_id,
            reservation_id: reservation.id,
            schedule_id: reservation.schedule_id,
            amount: payment.amount,
            idempotency_token: payment.idempotency_token.clone(),
            approved_at: payment.approved_at,
        }
    }
}
