use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    LedgerEntryId, Money, PaymentId, ReservationId, ScheduleId, SeatId, UserId, WalletId,
};
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::{
    LedgerEntry, LedgerRepository, NewLedgerEntry, NewPayment, NewReservation, Payment,
    PaymentRepository, Reservation, ReservationRepository, ReservationStatus, Result, Schedule,
    Seat, SeatGrade, SeatRepository, SeatStatus, Store, StoreError, UnitOfWork, Wallet,
    WalletRepository,
};

/// Catalog fields of a seat as stored. Status and price are derived on load.
#[derive(Debug, Clone)]
struct SeatRow {
    id: SeatId,
    schedule_id: ScheduleId,
    seat_number: i32,
    grade: SeatGrade,
}

#[derive(Debug, Default)]
struct Tables {
    schedules: HashMap<ScheduleId, Schedule>,
    seats: BTreeMap<SeatId, SeatRow>,
    reservations: BTreeMap<ReservationId, Reservation>,
    wallets: BTreeMap<WalletId, Wallet>,
    payments: BTreeMap<PaymentId, Payment>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Seat(SeatId),
    Reservation(ReservationId),
    Wallet(WalletId),
}

#[derive(Debug, Default)]
struct Sequences {
    reservation: AtomicI64,
    payment: AtomicI64,
    ledger: AtomicI64,
}

fn next_id(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    sequences: Sequences,
    fail_on_commit: AtomicBool,
}

impl Shared {
    fn row_lock(&self, key: RowKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }

    fn is_row_locked(&self, key: RowKey) -> bool {
        let locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.get(&key).is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drops the map entries for `keys` that no unit of work holds or awaits.
    fn prune_row_locks(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&key);
            }
        }
    }
}

/// Row locks held by one unit of work.
///
/// Dropping releases every guard, then evicts the entries nobody else is
/// waiting on so the lock table only grows with contention.
struct RowLocks {
    shared: Arc<Shared>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
}

impl Drop for RowLocks {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.guards.drain().map(|(key, _guard)| key).collect();
        if !keys.is_empty() {
            self.shared.prune_row_locks(keys);
        }
    }
}

/// In-memory store implementation for testing.
///
/// Provides the same locking and visibility rules as the PostgreSQL
/// implementation: `*_for_update` blocks while another unit of work holds
/// the row, and staged writes are applied atomically on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail as if the database went away.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.shared.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of committed reservations.
    pub async fn reservation_count(&self) -> usize {
        self.shared.tables.read().await.reservations.len()
    }

    /// Returns the number of committed payments.
    pub async fn payment_count(&self) -> usize {
        self.shared.tables.read().await.payments.len()
    }

    /// Returns every committed payment for a reservation.
    pub async fn payments_for_reservation(&self, reservation_id: ReservationId) -> Vec<Payment> {
        self.shared
            .tables
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect()
    }
}

/// Writes staged by a unit of work, keyed like the committed tables.
#[derive(Debug, Default)]
struct Pending {
    schedules: HashMap<ScheduleId, Schedule>,
    seats: HashMap<SeatId, SeatRow>,
    reservations: BTreeMap<ReservationId, Reservation>,
    wallets: HashMap<WalletId, Wallet>,
    decrements: HashMap<WalletId, Money>,
    payments: BTreeMap<PaymentId, Payment>,
    ledger: Vec<LedgerEntry>,
}

/// Committed tables overlaid with one unit of work's own writes.
struct View<'a> {
    tables: &'a Tables,
    pending: &'a Pending,
}

impl<'a> View<'a> {
    fn new(tables: &'a Tables, pending: &'a Pending) -> Self {
        Self { tables, pending }
    }

    fn schedule(&self, id: ScheduleId) -> Option<&'a Schedule> {
        self.pending
            .schedules
            .get(&id)
            .or_else(|| self.tables.schedules.get(&id))
    }

    fn seat(&self, id: SeatId) -> Option<Seat> {
        let row = self
            .pending
            .seats
            .get(&id)
            .or_else(|| self.tables.seats.get(&id))?;
        let schedule = self.schedule(row.schedule_id)?;
        let held = self
            .reservations()
            .any(|r| r.seat_id == id && r.status.occupies_seat());

        Some(Seat {
            id: row.id,
            schedule_id: row.schedule_id,
            seat_number: row.seat_number,
            grade: row.grade,
            status: if held {
                SeatStatus::Held
            } else {
                SeatStatus::Available
            },
            price: schedule.price,
        })
    }

    fn reservation(&self, id: ReservationId) -> Option<&'a Reservation> {
        self.pending
            .reservations
            .get(&id)
            .or_else(|| self.tables.reservations.get(&id))
    }

    fn reservations(&self) -> impl Iterator<Item = &'a Reservation> + 'a {
        let pending = self.pending;
        self.tables
            .reservations
            .values()
            .filter(move |r| !pending.reservations.contains_key(&r.id))
            .chain(pending.reservations.values())
    }

    fn wallet(&self, id: WalletId) -> Option<Wallet> {
        let mut wallet = self
            .pending
            .wallets
            .get(&id)
            .or_else(|| self.tables.wallets.get(&id))
            .cloned()?;
        if let Some(decrement) = self.pending.decrements.get(&id) {
            wallet.balance = wallet.balance.checked_sub(*decrement)?;
        }
        Some(wallet)
    }

    fn wallet_by_user(&self, user_id: UserId) -> Option<Wallet> {
        let id = self
            .pending
            .wallets
            .values()
            .chain(self.tables.wallets.values())
            .find(|w| w.user_id == user_id)?
            .id;
        self.wallet(id)
    }

    fn payments(&self) -> impl Iterator<Item = &'a Payment> + 'a {
        self.tables
            .payments
            .values()
            .chain(self.pending.payments.values())
    }

    fn ledger_for_wallet(&self, wallet_id: WalletId) -> Vec<LedgerEntry> {
        self.tables
            .ledger
            .iter()
            .chain(self.pending.ledger.iter())
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            locks: RowLocks {
                shared: Arc::clone(&self.shared),
                guards: HashMap::new(),
            },
            pending: Pending::default(),
        })
    }

    async fn find_seat(&self, id: SeatId) -> Result<Option<Seat>> {
        let tables = self.shared.tables.read().await;
        let empty = Pending::default();
        Ok(View::new(&tables, &empty).seat(id))
    }

    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let tables = self.shared.tables.read().await;
        Ok(tables.reservations.get(&id).cloned())
    }

    async fn find_reservation_by_token(&self, token: &str) -> Result<Option<Reservation>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .reservations
            .values()
            .find(|r| r.idempotency_token == token)
            .cloned())
    }

    async fn find_payment_by_token(&self, token: &str) -> Result<Option<Payment>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.idempotency_token == token)
            .cloned())
    }

    async fn find_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let tables = self.shared.tables.read().await;
        Ok(tables.wallets.values().find(|w| w.user_id == user_id).cloned())
    }

    async fn ledger_entries_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let tables = self.shared.tables.read().await;
        let empty = Pending::default();
        Ok(View::new(&tables, &empty).ledger_for_wallet(wallet_id))
    }

    async fn count_seats_by_schedule(&self, schedule_id: ScheduleId) -> Result<u64> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .seats
            .values()
            .filter(|s| s.schedule_id == schedule_id)
            .count() as u64)
    }

    async fn count_reservations_by_schedule_and_status(
        &self,
        schedule_id: ScheduleId,
        status: ReservationStatus,
    ) -> Result<u64> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .reservations
            .values()
            .filter(|r| r.schedule_id == schedule_id && r.status == status)
            .count() as u64)
    }

    async fn expire_holds(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.shared.tables.write().await;
        let mut expired = 0;

        for reservation in tables.reservations.values_mut() {
            if reservation.status == ReservationStatus::Hold
                && reservation.hold_expires_at < before
                && !self
                    .shared
                    .is_row_locked(RowKey::Reservation(reservation.id))
            {
                reservation.status = ReservationStatus::Expired;
                expired += 1;
            }
        }

        Ok(expired)
    }
}

/// Unit of work over an [`InMemoryStore`].
///
/// Row locks are held until the unit of work is committed or dropped.
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    locks: RowLocks,
    pending: Pending,
}

impl InMemoryUnitOfWork {
    async fn lock_row(&mut self, key: RowKey) {
        if self.locks.guards.contains_key(&key) {
            return;
        }
        let guard = self.shared.row_lock(key).lock_owned().await;
        self.locks.guards.insert(key, guard);
    }

    /// Re-checks the unique constraints against everything committed since
    /// the rows were staged.
    fn validate(&self, tables: &Tables) -> Result<()> {
        let view = View::new(tables, &self.pending);

        for reservation in self.pending.reservations.values() {
            if view.reservations().any(|r| {
                r.id != reservation.id && r.idempotency_token == reservation.idempotency_token
            }) {
                return Err(StoreError::DuplicateIdempotencyToken {
                    entity: "reservation",
                    token: reservation.idempotency_token.clone(),
                });
            }
            if reservation.status == ReservationStatus::Hold
                && view.reservations().any(|r| {
                    r.id != reservation.id
                        && r.seat_id == reservation.seat_id
                        && r.status == ReservationStatus::Hold
                })
            {
                return Err(StoreError::ConcurrentHold {
                    seat_id: reservation.seat_id,
                });
            }
        }

        for payment in self.pending.payments.values() {
            if tables
                .payments
                .values()
                .any(|p| p.idempotency_token == payment.idempotency_token)
            {
                return Err(StoreError::DuplicateIdempotencyToken {
                    entity: "payment",
                    token: payment.idempotency_token.clone(),
                });
            }
        }

        for wallet_id in self.pending.decrements.keys() {
            if view.wallet(*wallet_id).is_none_or(|w| w.balance.is_negative()) {
                return Err(StoreError::InvalidData(format!(
                    "wallet {wallet_id} balance would become negative"
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SeatRepository for InMemoryUnitOfWork {
    async fn find_seat(&mut self, id: SeatId) -> Result<Option<Seat>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending).seat(id))
    }

    async fn find_seat_for_update(&mut self, id: SeatId) -> Result<Option<Seat>> {
        self.lock_row(RowKey::Seat(id)).await;
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending).seat(id))
    }

    async fn save_seat(&mut self, seat: &Seat) -> Result<()> {
        {
            let tables = self.shared.tables.read().await;
            if View::new(&tables, &self.pending)
                .schedule(seat.schedule_id)
                .is_none()
            {
                return Err(StoreError::InvalidData(format!(
                    "seat {} references unknown schedule {}",
                    seat.id, seat.schedule_id
                )));
            }
        }

        self.lock_row(RowKey::Seat(seat.id)).await;
        self.pending.seats.insert(
            seat.id,
            SeatRow {
                id: seat.id,
                schedule_id: seat.schedule_id,
                seat_number: seat.seat_number,
                grade: seat.grade,
            },
        );
        Ok(())
    }

    async fn save_schedule(&mut self, schedule: &Schedule) -> Result<()> {
        self.pending
            .schedules
            .insert(schedule.id, schedule.clone());
        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for InMemoryUnitOfWork {
    async fn find_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending).reservation(id).cloned())
    }

    async fn find_reservation_for_update(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>> {
        self.lock_row(RowKey::Reservation(id)).await;
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending).reservation(id).cloned())
    }

    async fn find_reservation_by_token(&mut self, token: &str) -> Result<Option<Reservation>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending)
            .reservations()
            .find(|r| r.idempotency_token == token)
            .cloned())
    }

    async fn exists_reservation_by_seat_and_status(
        &mut self,
        seat_id: SeatId,
        status: ReservationStatus,
    ) -> Result<bool> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending)
            .reservations()
            .any(|r| r.seat_id == seat_id && r.status == status))
    }

    async fn insert_reservation(&mut self, reservation: NewReservation) -> Result<Reservation> {
        {
            let tables = self.shared.tables.read().await;
            let view = View::new(&tables, &self.pending);
            if view
                .reservations()
                .any(|r| r.idempotency_token == reservation.idempotency_token)
            {
                return Err(StoreError::DuplicateIdempotencyToken {
                    entity: "reservation",
                    token: reservation.idempotency_token,
                });
            }
            if view
                .reservations()
                .any(|r| r.seat_id == reservation.seat_id && r.status == ReservationStatus::Hold)
            {
                return Err(StoreError::ConcurrentHold {
                    seat_id: reservation.seat_id,
                });
            }
        }

        let id = ReservationId::new(next_id(&self.shared.sequences.reservation));
        let reservation = reservation.into_reservation(id);
        self.pending.reservations.insert(id, reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<()> {
        self.lock_row(RowKey::Reservation(id)).await;
        let mut reservation = {
            let tables = self.shared.tables.read().await;
            View::new(&tables, &self.pending)
                .reservation(id)
                .cloned()
                .ok_or_else(|| StoreError::InvalidData(format!("reservation {id} not found")))?
        };
        reservation.status = status;
        self.pending.reservations.insert(id, reservation);
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for InMemoryUnitOfWork {
    async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending).wallet_by_user(user_id))
    }

    async fn balance(&mut self, wallet_id: WalletId) -> Result<Option<Money>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending)
            .wallet(wallet_id)
            .map(|w| w.balance))
    }

    async fn decrement_if_sufficient(
        &mut self,
        wallet_id: WalletId,
        amount: Money,
    ) -> Result<u64> {
        self.lock_row(RowKey::Wallet(wallet_id)).await;
        let sufficient = {
            let tables = self.shared.tables.read().await;
            View::new(&tables, &self.pending)
                .wallet(wallet_id)
                .is_some_and(|w| w.balance >= amount)
        };
        if !sufficient {
            return Ok(0);
        }

        let staged = self
            .pending
            .decrements
            .entry(wallet_id)
            .or_insert_with(Money::zero);
        *staged = staged.checked_add(amount).ok_or_else(|| {
            StoreError::InvalidData(format!("wallet {wallet_id} decrement overflows"))
        })?;
        Ok(1)
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        {
            let tables = self.shared.tables.read().await;
            let view = View::new(&tables, &self.pending);
            if view
                .wallet_by_user(wallet.user_id)
                .is_some_and(|w| w.id != wallet.id)
            {
                return Err(StoreError::InvalidData(format!(
                    "user {} already has a wallet",
                    wallet.user_id
                )));
            }
        }

        self.lock_row(RowKey::Wallet(wallet.id)).await;
        self.pending.decrements.remove(&wallet.id);
        self.pending.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryUnitOfWork {
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        {
            let tables = self.shared.tables.read().await;
            if View::new(&tables, &self.pending)
                .payments()
                .any(|p| p.idempotency_token == payment.idempotency_token)
            {
                return Err(StoreError::DuplicateIdempotencyToken {
                    entity: "payment",
                    token: payment.idempotency_token,
                });
            }
        }

        let id = PaymentId::new(next_id(&self.shared.sequences.payment));
        let payment = payment.into_payment(id);
        self.pending.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_token(&mut self, token: &str) -> Result<Option<Payment>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending)
            .payments()
            .find(|p| p.idempotency_token == token)
            .cloned())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryUnitOfWork {
    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let id = LedgerEntryId::new(next_id(&self.shared.sequences.ledger));
        let entry = entry.into_entry(id);
        self.pending.ledger.push(entry.clone());
        Ok(entry)
    }

    async fn ledger_entries_for_wallet(&mut self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let tables = self.shared.tables.read().await;
        Ok(View::new(&tables, &self.pending).ledger_for_wallet(wallet_id))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self) -> Result<()> {
        if self.shared.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut tables = self.shared.tables.write().await;
        self.validate(&tables)?;

        let Pending {
            schedules,
            seats,
            reservations,
            wallets,
            decrements,
            payments,
            ledger,
        } = self.pending;

        tables.schedules.extend(schedules);
        tables.seats.extend(seats);
        tables.reservations.extend(reservations);
        tables.wallets.extend(wallets);
        for (wallet_id, amount) in decrements {
            if let Some(wallet) = tables.wallets.get_mut(&wallet_id)
                && let Some(balance) = wallet.balance.checked_sub(amount)
            {
                wallet.balance = balance;
            }
        }
        tables.payments.extend(payments);
        tables.ledger.extend(ledger);

        // Row locks in `self.locks` are released and pruned when it drops here.
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
