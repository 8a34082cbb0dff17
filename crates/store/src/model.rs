//! Rows held by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{
    ConcertId, LedgerEntryId, Money, PaymentId, ReservationId, ScheduleId, SeatId, UserId,
    WalletId,
};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Currency assigned to wallets when none is given.
pub const DEFAULT_CURRENCY: &str = "KRW";

/// A performance of a concert. All seats of a schedule share its price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub concert_id: ConcertId,
    /// Ticket price in major currency units.
    pub price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatGrade {
    Vip,
    Royal,
    Special,
    AGrade,
}

impl SeatGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatGrade::Vip => "VIP",
            SeatGrade::Royal => "ROYAL",
            SeatGrade::Special => "SPECIAL",
            SeatGrade::AGrade => "A_GRADE",
        }
    }
}

impl FromStr for SeatGrade {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIP" => Ok(SeatGrade::Vip),
            "ROYAL" => Ok(SeatGrade::Royal),
            "SPECIAL" => Ok(SeatGrade::Special),
            "A_GRADE" => Ok(SeatGrade::AGrade),
            other => Err(StoreError::InvalidData(format!("unknown seat grade: {other}"))),
        }
    }
}

/// Availability of a seat.
///
/// Never written directly: a seat is `Held` while any reservation for it is
/// on hold or paid, and becomes `Available` again as soon as that
/// reservation expires or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub schedule_id: ScheduleId,
    pub seat_number: i32,
    pub grade: SeatGrade,
    /// Derived on load; ignored by `save_seat`.
    pub status: SeatStatus,
    /// Price of the owning schedule in major units; ignored by `save_seat`.
    pub price: i64,
}

impl Seat {
    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }
}

/// Lifecycle of a reservation.
///
/// ```text
/// HOLD --pay--> PAID
/// HOLD --sweep--> EXPIRED
/// HOLD --cancel--> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Hold,
    Paid,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Hold => "HOLD",
            ReservationStatus::Paid => "PAID",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Returns true once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Hold)
    }

    /// Returns true if the seat is occupied while a reservation is in this state.
    pub fn occupies_seat(&self) -> bool {
        matches!(self, ReservationStatus::Hold | ReservationStatus::Paid)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (
                ReservationStatus::Hold,
                ReservationStatus::Paid | ReservationStatus::Expired | ReservationStatus::Cancelled
            )
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOLD" => Ok(ReservationStatus::Hold),
            "PAID" => Ok(ReservationStatus::Paid),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(StoreError::InvalidData(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub seat_id: SeatId,
    pub schedule_id: ScheduleId,
    pub status: ReservationStatus,
    pub hold_expires_at: DateTime<Utc>,
    pub amount: Money,
    pub idempotency_token: String,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// A hold is expired once `now` is past its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.hold_expires_at
    }

    pub fn is_payable(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Hold && !self.is_expired(now)
    }
}

/// A reservation about to be inserted in the `HOLD` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: UserId,
    pub seat_id: SeatId,
    pub schedule_id: ScheduleId,
    pub hold_expires_at: DateTime<Utc>,
    pub amount: Money,
    pub idempotency_token: String,
    pub created_at: DateTime<Utc>,
}

impl NewReservation {
    pub(crate) fn into_reservation(self, id: ReservationId) -> Reservation {
        Reservation {
            id,
            user_id: self.user_id,
            seat_id: self.seat_id,
            schedule_id: self.schedule_id,
            status: ReservationStatus::Hold,
            hold_expires_at: self.hold_expires_at,
            amount: self.amount,
            idempotency_token: self.idempotency_token,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Money,
    pub currency: String,
}

impl Wallet {
    /// Creates a wallet in the default currency.
    pub fn new(id: WalletId, user_id: UserId, balance: Money) -> Self {
        Self {
            id,
            user_id,
            balance,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Approved,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Approved => "APPROVED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVED" => Ok(PaymentStatus::Approved),
            other => Err(StoreError::InvalidData(format!("unknown payment status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub idempotency_token: String,
    pub approved_at: DateTime<Utc>,
}

/// A payment about to be inserted in the `APPROVED` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub amount: Money,
    pub idempotency_token: String,
    pub approved_at: DateTime<Utc>,
}

impl NewPayment {
    pub(crate) fn into_payment(self, id: PaymentId) -> Payment {
        Payment {
            id,
            reservation_id: self.reservation_id,
            user_id: self.user_id,
            amount: self.amount,
            status: PaymentStatus::Approved,
            idempotency_token: self.idempotency_token,
            approved_at: self.approved_at,
        }
    }
}

/// Kind of balance movement recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerType {
    Charge,
    Payment,
    Refund,
    Cancel,
    Adjust,
}

impl LedgerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerType::Charge => "CHARGE",
            LedgerType::Payment => "PAYMENT",
            LedgerType::Refund => "REFUND",
            LedgerType::Cancel => "CANCEL",
            LedgerType::Adjust => "ADJUST",
        }
    }
}

impl FromStr for LedgerType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHARGE" => Ok(LedgerType::Charge),
            "PAYMENT" => Ok(LedgerType::Payment),
            "REFUND" => Ok(LedgerType::Refund),
            "CANCEL" => Ok(LedgerType::Cancel),
            "ADJUST" => Ok(LedgerType::Adjust),
            other => Err(StoreError::InvalidData(format!("unknown ledger type: {other}"))),
        }
    }
}

/// An append-only record of a balance movement. Debits carry a negative amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub wallet_id: WalletId,
    pub amount: Money,
    pub entry_type: LedgerType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub wallet_id: WalletId,
    pub amount: Money,
    pub entry_type: LedgerType,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    pub(crate) fn into_entry(self, id: LedgerEntryId) -> LedgerEntry {
        LedgerEntry {
            id,
            wallet_id: self.wallet_id,
            amount: self.amount,
            entry_type: self.entry_type,
            created_at: self.created_at,
        }
    }
}
