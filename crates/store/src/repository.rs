use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, ReservationId, ScheduleId, SeatId, UserId, WalletId};

use crate::{
    LedgerEntry, NewLedgerEntry, NewPayment, NewReservation, Payment, Reservation,
    ReservationStatus, Result, Schedule, Seat, Wallet,
};

/// Seat and schedule access inside a unit of work.
#[async_trait]
pub trait SeatRepository: Send {
    /// Loads a seat without locking it.
    async fn find_seat(&mut self, id: SeatId) -> Result<Option<Seat>>;

    /// Loads a seat and locks its row until the unit of work ends.
    ///
    /// The returned status is read after the lock is granted, so it reflects
    /// everything committed by the previous holder.
    async fn find_seat_for_update(&mut self, id: SeatId) -> Result<Option<Seat>>;

    /// Inserts or replaces a seat's catalog fields.
    async fn save_seat(&mut self, seat: &Seat) -> Result<()>;

    /// Inserts or replaces a schedule.
    async fn save_schedule(&mut self, schedule: &Schedule) -> Result<()>;
}

/// Reservation access inside a unit of work.
#[async_trait]
pub trait ReservationRepository: Send {
    async fn find_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Loads a reservation and locks its row until the unit of work ends.
    async fn find_reservation_for_update(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>>;

    async fn find_reservation_by_token(&mut self, token: &str) -> Result<Option<Reservation>>;

    async fn exists_reservation_by_seat_and_status(
        &mut self,
        seat_id: SeatId,
        status: ReservationStatus,
    ) -> Result<bool>;

    /// Inserts a reservation in the `HOLD` state.
    ///
    /// Fails with `DuplicateIdempotencyToken` if the token is taken and with
    /// `ConcurrentHold` if the seat already has a reservation on hold.
    async fn insert_reservation(&mut self, reservation: NewReservation) -> Result<Reservation>;

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<()>;
}

/// Wallet access inside a unit of work.
#[async_trait]
pub trait WalletRepository: Send {
    async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>>;

    async fn balance(&mut self, wallet_id: WalletId) -> Result<Option<Money>>;

    /// Subtracts `amount` only if the balance covers it, as one atomic step.
    ///
    /// Returns the number of rows changed: 1 on success, 0 when the balance
    /// was insufficient or the wallet does not exist.
    async fn decrement_if_sufficient(&mut self, wallet_id: WalletId, amount: Money)
    -> Result<u64>;

    /// Inserts or replaces a wallet.
    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()>;
}

/// Payment access inside a unit of work.
#[async_trait]
pub trait PaymentRepository: Send {
    /// Inserts an approved payment. Fails with `DuplicateIdempotencyToken` if
    /// the token is taken.
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment>;

    async fn find_payment_by_token(&mut self, token: &str) -> Result<Option<Payment>>;
}

/// Ledger access inside a unit of work.
#[async_trait]
pub trait LedgerRepository: Send {
    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry>;

    /// Returns a wallet's entries, oldest first.
    async fn ledger_entries_for_wallet(&mut self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>>;
}

/// A transactional scope over all repositories.
///
/// Writes become visible to others only on [`UnitOfWork::commit`]. Dropping a
/// unit of work without committing rolls it back and releases its row locks.
#[async_trait]
pub trait UnitOfWork:
    SeatRepository
    + ReservationRepository
    + WalletRepository
    + PaymentRepository
    + LedgerRepository
    + Send
{
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Entry point to the storage backend.
///
/// Besides opening units of work, the store answers the lookups that are
/// made outside one and runs the bulk expiry used by the sweeper.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: UnitOfWork + 'static;

    /// Opens a unit of work.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_seat(&self, id: SeatId) -> Result<Option<Seat>>;

    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    async fn find_reservation_by_token(&self, token: &str) -> Result<Option<Reservation>>;

    async fn find_payment_by_token(&self, token: &str) -> Result<Option<Payment>>;

    async fn find_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>>;

    async fn ledger_entries_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>>;

    async fn count_seats_by_schedule(&self, schedule_id: ScheduleId) -> Result<u64>;

    async fn count_reservations_by_schedule_and_status(
        &self,
        schedule_id: ScheduleId,
        status: ReservationStatus,
    ) -> Result<u64>;

    /// Moves every `HOLD` reservation whose expiry is before `before` to
    /// `EXPIRED` in one conditional update. Returns how many rows changed.
    ///
    /// A row locked by an open unit of work is never expired underneath it:
    /// Postgres waits for the lock and re-checks the condition, the in-memory
    /// store skips the row until the next call.
    async fn expire_holds(&self, before: DateTime<Utc>) -> Result<u64>;
}
