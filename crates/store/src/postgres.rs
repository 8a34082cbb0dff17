use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    LedgerEntryId, Money, PaymentId, ReservationId, ScheduleId, SeatId, UserId, WalletId,
};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    LedgerEntry, LedgerRepository, NewLedgerEntry, NewPayment, NewReservation, Payment,
    PaymentRepository, Reservation, ReservationRepository, ReservationStatus, Result, Schedule,
    Seat, SeatRepository, SeatStatus, Store, StoreError, UnitOfWork, Wallet, WalletRepository,
};

const SEAT_COLUMNS: &str = r#"
    SELECT s.id, s.schedule_id, s.seat_number, s.grade, sc.price,
           EXISTS (
               SELECT 1 FROM reservations r
               WHERE r.seat_id = s.id AND r.status IN ('HOLD', 'PAID')
           ) AS held
    FROM seats s
    JOIN schedules sc ON sc.id = s.schedule_id
"#;

const RESERVATION_COLUMNS: &str = "id, user_id, seat_id, schedule_id, status, hold_expires_at, \
     amount, idempotency_token, created_at";

const PAYMENT_COLUMNS: &str =
    "id, reservation_id, user_id, amount, status, idempotency_token, approved_at";

const UNIQUE_RESERVATION_TOKEN: &str = "unique_reservation_token";
const UNIQUE_HOLD_PER_SEAT: &str = "unique_hold_per_seat";
const UNIQUE_PAYMENT_TOKEN: &str = "unique_payment_token";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `url` and wraps it.
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(PgPool::connect(url).await?))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_seat(row: PgRow) -> Result<Seat> {
    let held: bool = row.try_get("held")?;
    Ok(Seat {
        id: SeatId::new(row.try_get("id")?),
        schedule_id: ScheduleId::new(row.try_get("schedule_id")?),
        seat_number: row.try_get("seat_number")?,
        grade: row.try_get::<String, _>("grade")?.parse()?,
        status: if held {
            SeatStatus::Held
        } else {
            SeatStatus::Available
        },
        price: row.try_get("price")?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    Ok(Reservation {
        id: ReservationId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        seat_id: SeatId::new(row.try_get("seat_id")?),
        schedule_id: ScheduleId::new(row.try_get("schedule_id")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        hold_expires_at: row.try_get("hold_expires_at")?,
        amount: Money::from_minor(row.try_get("amount")?),
        idempotency_token: row.try_get("idempotency_token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_wallet(row: PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: WalletId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        balance: Money::from_minor(row.try_get("balance")?),
        currency: row.try_get("currency")?,
    })
}

fn row_to_payment(row: PgRow) -> Result<Payment> {
    Ok(Payment {
        id: PaymentId::new(row.try_get("id")?),
        reservation_id: ReservationId::new(row.try_get("reservation_id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        amount: Money::from_minor(row.try_get("amount")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        idempotency_token: row.try_get("idempotency_token")?,
        approved_at: row.try_get("approved_at")?,
    })
}

fn row_to_ledger_entry(row: PgRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: LedgerEntryId::new(row.try_get("id")?),
        wallet_id: WalletId::new(row.try_get("wallet_id")?),
        amount: Money::from_minor(row.try_get("amount")?),
        entry_type: row.try_get::<String, _>("entry_type")?.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

/// Returns the violated constraint's name, if `e` is a unique violation.
fn unique_violation(e: &sqlx::Error) -> Option<&str> {
    if let sqlx::Error::Database(db_err) = e
        && db_err.is_unique_violation()
    {
        let constraint = db_err.constraint();
        tracing::debug!(constraint = ?constraint, "unique violation");
        return constraint;
    }
    None
}

async fn fetch_seat<'e, E: PgExecutor<'e>>(executor: E, id: SeatId) -> Result<Option<Seat>> {
    let row = sqlx::query(&format!("{SEAT_COLUMNS} WHERE s.id = $1"))
        .bind(id.get())
        .fetch_optional(executor)
        .await?;
    row.map(row_to_seat).transpose()
}

async fn fetch_reservation<'e, E: PgExecutor<'e>>(
    executor: E,
    id: ReservationId,
) -> Result<Option<Reservation>> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
    ))
    .bind(id.get())
    .fetch_optional(executor)
    .await?;
    row.map(row_to_reservation).transpose()
}

async fn fetch_reservation_by_token<'e, E: PgExecutor<'e>>(
    executor: E,
    token: &str,
) -> Result<Option<Reservation>> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE idempotency_token = $1"
    ))
    .bind(token)
    .fetch_optional(executor)
    .await?;
    row.map(row_to_reservation).transpose()
}

async fn fetch_payment_by_token<'e, E: PgExecutor<'e>>(
    executor: E,
    token: &str,
) -> Result<Option<Payment>> {
    let row = sqlx::query(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE idempotency_token = $1"
    ))
    .bind(token)
    .fetch_optional(executor)
    .await?;
    row.map(row_to_payment).transpose()
}

async fn fetch_wallet_by_user<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: UserId,
) -> Result<Option<Wallet>> {
    let row = sqlx::query("SELECT id, user_id, balance, currency FROM wallets WHERE user_id = $1")
        .bind(user_id.get())
        .fetch_optional(executor)
        .await?;
    row.map(row_to_wallet).transpose()
}

async fn fetch_ledger_entries<'e, E: PgExecutor<'e>>(
    executor: E,
    wallet_id: WalletId,
) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, wallet_id, amount, entry_type, created_at
        FROM ledger_entries
        WHERE wallet_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(wallet_id.get())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(row_to_ledger_entry).collect()
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresUnitOfWork {
            tx: self.pool.begin().await?,
        })
    }

    async fn find_seat(&self, id: SeatId) -> Result<Option<Seat>> {
        fetch_seat(&self.pool, id).await
    }

    async fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        fetch_reservation(&self.pool, id).await
    }

    async fn find_reservation_by_token(&self, token: &str) -> Result<Option<Reservation>> {
        fetch_reservation_by_token(&self.pool, token).await
    }

    async fn find_payment_by_token(&self, token: &str) -> Result<Option<Payment>> {
        fetch_payment_by_token(&self.pool, token).await
    }

    async fn find_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        fetch_wallet_by_user(&self.pool, user_id).await
    }

    async fn ledger_entries_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        fetch_ledger_entries(&self.pool, wallet_id).await
    }

    async fn count_seats_by_schedule(&self, schedule_id: ScheduleId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seats WHERE schedule_id = $1")
            .bind(schedule_id.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_reservations_by_schedule_and_status(
        &self,
        schedule_id: ScheduleId,
        status: ReservationStatus,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE schedule_id = $1 AND status = $2",
        )
        .bind(schedule_id.get())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn expire_holds(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'EXPIRED'
            WHERE status = 'HOLD' AND hold_expires_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        let expired = result.rows_affected();
        tracing::debug!(%before, expired, "expired stale holds");
        Ok(expired)
    }
}

/// Unit of work backed by a database transaction.
///
/// Dropping it without calling `commit` rolls the transaction back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SeatRepository for PostgresUnitOfWork {
    async fn find_seat(&mut self, id: SeatId) -> Result<Option<Seat>> {
        fetch_seat(&mut *self.tx, id).await
    }

    async fn find_seat_for_update(&mut self, id: SeatId) -> Result<Option<Seat>> {
        // Lock first, then read the derived status in a fresh statement so it
        // sees whatever the previous lock holder committed.
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM seats WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        if locked.is_none() {
            return Ok(None);
        }
        fetch_seat(&mut *self.tx, id).await
    }

    async fn save_seat(&mut self, seat: &Seat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seats (id, schedule_id, seat_number, grade)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                schedule_id = EXCLUDED.schedule_id,
                seat_number = EXCLUDED.seat_number,
                grade = EXCLUDED.grade
            "#,
        )
        .bind(seat.id.get())
        .bind(seat.schedule_id.get())
        .bind(seat.seat_number)
        .bind(seat.grade.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn save_schedule(&mut self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (id, concert_id, price)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                concert_id = EXCLUDED.concert_id,
                price = EXCLUDED.price
            "#,
        )
        .bind(schedule.id.get())
        .bind(schedule.concert_id.get())
        .bind(schedule.price)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for PostgresUnitOfWork {
    async fn find_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        fetch_reservation(&mut *self.tx, id).await
    }

    async fn find_reservation_for_update(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(row_to_reservation).transpose()
    }

    async fn find_reservation_by_token(&mut self, token: &str) -> Result<Option<Reservation>> {
        fetch_reservation_by_token(&mut *self.tx, token).await
    }

    async fn exists_reservation_by_seat_and_status(
        &mut self,
        seat_id: SeatId,
        status: ReservationStatus,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reservations WHERE seat_id = $1 AND status = $2)",
        )
        .bind(seat_id.get())
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_reservation(&mut self, reservation: NewReservation) -> Result<Reservation> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reservations
                (user_id, seat_id, schedule_id, status, hold_expires_at, amount, idempotency_token, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(reservation.user_id.get())
        .bind(reservation.seat_id.get())
        .bind(reservation.schedule_id.get())
        .bind(ReservationStatus::Hold.as_str())
        .bind(reservation.hold_expires_at)
        .bind(reservation.amount.minor())
        .bind(&reservation.idempotency_token)
        .bind(reservation.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(UNIQUE_RESERVATION_TOKEN) => StoreError::DuplicateIdempotencyToken {
                entity: "reservation",
                token: reservation.idempotency_token.clone(),
            },
            Some(UNIQUE_HOLD_PER_SEAT) => StoreError::ConcurrentHold {
                seat_id: reservation.seat_id,
            },
            _ => StoreError::Database(e),
        })?;

        row_to_reservation(row)
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE reservations SET status = $2 WHERE id = $1")
            .bind(id.get())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(UNIQUE_HOLD_PER_SEAT) => StoreError::InvalidData(format!(
                    "reservation {id} cannot return to HOLD while its seat is held"
                )),
                _ => StoreError::Database(e),
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidData(format!("reservation {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for PostgresUnitOfWork {
    async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        fetch_wallet_by_user(&mut *self.tx, user_id).await
    }

    async fn balance(&mut self, wallet_id: WalletId) -> Result<Option<Money>> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1")
            .bind(wallet_id.get())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(balance.map(Money::from_minor))
    }

    async fn decrement_if_sufficient(
        &mut self,
        wallet_id: WalletId,
        amount: Money,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance - $2
            WHERE id = $1 AND balance >= $2
            "#,
        )
        .bind(wallet_id.get())
        .bind(amount.minor())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, currency)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                balance = EXCLUDED.balance,
                currency = EXCLUDED.currency
            "#,
        )
        .bind(wallet.id.get())
        .bind(wallet.user_id.get())
        .bind(wallet.balance.minor())
        .bind(&wallet.currency)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for PostgresUnitOfWork {
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments
                (reservation_id, user_id, amount, status, idempotency_token, approved_at)
            VALUES ($1, $2, $3, 'APPROVED', $4, $5)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.reservation_id.get())
        .bind(payment.user_id.get())
        .bind(payment.amount.minor())
        .bind(&payment.idempotency_token)
        .bind(payment.approved_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(UNIQUE_PAYMENT_TOKEN) => StoreError::DuplicateIdempotencyToken {
                entity: "payment",
                token: payment.idempotency_token.clone(),
            },
            _ => StoreError::Database(e),
        })?;

        row_to_payment(row)
    }

    async fn find_payment_by_token(&mut self, token: &str) -> Result<Option<Payment>> {
        fetch_payment_by_token(&mut *self.tx, token).await
    }
}

#[async_trait]
impl LedgerRepository for PostgresUnitOfWork {
    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (wallet_id, amount, entry_type, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, wallet_id, amount, entry_type, created_at
            "#,
        )
        .bind(entry.wallet_id.get())
        .bind(entry.amount.minor())
        .bind(entry.entry_type.as_str())
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_ledger_entry(row)
    }

    async fn ledger_entries_for_wallet(&mut self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        fetch_ledger_entries(&mut *self.tx, wallet_id).await
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
