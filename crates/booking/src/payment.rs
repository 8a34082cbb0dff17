//! Payment of held reservations.

use std::time::Instant;

use common::{Clock, ReservationId};
use distributed_lock::{DistributedLock, LockManager};
use store::{
    LedgerRepository, LedgerType, NewLedgerEntry, NewPayment, Payment, PaymentRepository,
    Reservation, ReservationRepository, ReservationStatus, Store, StoreError, WalletRepository,
};
use uuid::Uuid;

use crate::Result;
use crate::error::BookingError;
use crate::events::PaymentCompleted;
use crate::notifier::PaymentPublisher;
use crate::policy::reservation_lock_key;
use crate::unit_of_work::finish;

enum Paid {
    New(Payment, Reservation),
    Replayed(Payment),
}

/// Turns a held reservation into a recorded payment.
///
/// Payments on one reservation are serialized by the `reservation:{id}`
/// lock. The wallet is debited by a single conditional decrement, so its
/// balance can never go negative no matter how many reservations a user
/// pays for at once.
#[derive(Clone)]
pub struct PaymentService<S, L, C> {
    store: S,
    locks: LockManager<L>,
    clock: C,
    publisher: PaymentPublisher,
}

impl<S, L, C> PaymentService<S, L, C>
where
    S: Store,
    L: DistributedLock + 'static,
    C: Clock,
{
    /// Creates a new payment service.
    pub fn new(store: S, locks: LockManager<L>, clock: C, publisher: PaymentPublisher) -> Self {
        Self {
            store,
            locks,
            clock,
            publisher,
        }
    }

    /// Pays for `reservation_id` from its owner's wallet.
    ///
    /// A non-empty `idempotency_token` that already belongs to a payment
    /// returns that payment with no balance side effect.
    #[tracing::instrument(skip(self, idempotency_token), fields(%reservation_id))]
    pub async fn pay(
        &self,
        reservation_id: ReservationId,
        idempotency_token: Option<String>,
    ) -> Result<Payment> {
        let started = Instant::now();
        let result = self.pay_reservation(reservation_id, idempotency_token).await;

        let outcome = match &result {
            Ok(Paid::New(..)) => "paid",
            Ok(Paid::Replayed(_)) => "replayed",
            Err(e) => e.kind(),
        };
        metrics::counter!("booking_payments_total", "outcome" => outcome).increment(1);
        metrics::histogram!("booking_payment_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Paid::New(payment, reservation)) => {
                tracing::info!(
                    payment_id = %payment.id,
                    amount = %payment.amount,
                    "payment approved"
                );
                // 11. Committed and unlocked: notify without waiting
                self.publisher
                    .publish(PaymentCompleted::new(&payment, &reservation));
                Ok(payment)
            }
            Ok(Paid::Replayed(payment)) => Ok(payment),
            Err(e) => {
                tracing::warn!(error = %e, "payment rejected");
                Err(e)
            }
        }
    }

    async fn pay_reservation(
        &self,
        reservation_id: ReservationId,
        idempotency_token: Option<String>,
    ) -> Result<Paid> {
        let token = idempotency_token.filter(|t| !t.is_empty());

        // 1. Replay before touching the reservation or the wallet
        if let Some(token) = &token
            && let Some(existing) = self.store.find_payment_by_token(token).await?
        {
            return Ok(Paid::Replayed(existing));
        }
        let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());

        // 2. Serialize on the reservation
        let key = reservation_lock_key(reservation_id);
        let result = self
            .locks
            .with_lock(&key, || self.record_payment(reservation_id, token.clone()))
            .await;

        match result {
            Err(BookingError::Store(StoreError::DuplicateIdempotencyToken { .. })) => {
                match self.store.find_payment_by_token(&token).await? {
                    Some(existing) => Ok(Paid::Replayed(existing)),
                    None => result,
                }
            }
            other => other,
        }
    }

    async fn record_payment(&self, reservation_id: ReservationId, token: String) -> Result<Paid> {
        let mut tx = self.store.begin().await?;
        let result = self.record_payment_in(&mut tx, reservation_id, token).await;
        finish(tx, result).await
    }

    async fn record_payment_in(
        &self,
        tx: &mut S::Tx,
        reservation_id: ReservationId,
        token: String,
    ) -> Result<Paid> {
        // 3. Re-check the token, then lock the reservation row
        if let Some(existing) = tx.find_payment_by_token(&token).await? {
            return Ok(Paid::Replayed(existing));
        }
        let reservation = tx
            .find_reservation_for_update(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))?;

        // 4. Payability. Swept or not, an expired hold reports as expired;
        // the status transition itself is left to the sweeper.
        let now = self.clock.now();
        match reservation.status {
            ReservationStatus::Hold if !reservation.is_expired(now) => {}
            ReservationStatus::Hold | ReservationStatus::Expired => {
                return Err(BookingError::ReservationExpired(reservation_id));
            }
            status => {
                return Err(BookingError::InvalidReservationState {
                    id: reservation_id,
                    status,
                });
            }
        }

        // 5. Wallet
        let wallet = tx
            .find_wallet_by_user(reservation.user_id)
            .await?
            .ok_or(BookingError::WalletNotFound(reservation.user_id))?;

        // 6. Conditional debit
        let amount = reservation.amount;
        if tx.decrement_if_sufficient(wallet.id, amount).await? == 0 {
            return Err(BookingError::InsufficientBalance {
                wallet_id: wallet.id,
                required: amount,
            });
        }

        // 7. Payment
        let payment = tx
            .insert_payment(NewPayment {
                reservation_id,
                user_id: reservation.user_id,
                amount,
                idempotency_token: token,
                approved_at: now,
            })
            .await?;

        // 8. Ledger
        tx.append_ledger_entry(NewLedgerEntry {
            wallet_id: wallet.id,
            amount: amount.negate(),
            entry_type: LedgerType::Payment,
            created_at: now,
        })
        .await?;

        // 9. Reservation
        tx.update_reservation_status(reservation_id, ReservationStatus::Paid)
            .await?;

        Ok(Paid::New(
            payment,
            Reservation {
                status: ReservationStatus::Paid,
                ..reservation
            },
        ))
    }
}
