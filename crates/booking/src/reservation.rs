//! Seat claim and hold lifecycle.

use std::time::Instant;

use common::{Clock, Money, ReservationId, SeatId, UserId};
use distributed_lock::{DistributedLock, LockManager};
use store::{
    NewReservation, Reservation, ReservationRepository, ReservationStatus, SeatRepository, Store,
    StoreError,
};
use uuid::Uuid;

use crate::error::BookingError;
use crate::policy::{BookingPolicy, reservation_lock_key, seat_lock_key};
use crate::unit_of_work::finish;
use crate::Result;

/// How a successful claim was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claimed {
    Held,
    Replayed,
}

/// A second hold on a seat is reported the same way whether the store caught
/// it at insert or at commit.
fn already_held(err: BookingError) -> BookingError {
    match err {
        BookingError::Store(StoreError::ConcurrentHold { seat_id }) => {
            BookingError::ReservationAlreadyHeld(seat_id)
        }
        other => other,
    }
}

/// Claims seats and manages the resulting holds.
///
/// Every claim on a seat runs under the `seat:{id}` lock, and inside it a
/// unit of work that locks the seat row, so at most one reservation per seat
/// is ever on hold.
#[derive(Clone)]
pub struct ReservationService<S, L, C> {
    store: S,
    locks: LockManager<L>,
    clock: C,
    policy: BookingPolicy,
}

impl<S, L, C> ReservationService<S, L, C>
where
    S: Store,
    L: DistributedLock + 'static,
    C: Clock,
{
    /// Creates a new reservation service.
    pub fn new(store: S, locks: LockManager<L>, clock: C, policy: BookingPolicy) -> Self {
        Self {
            store,
            locks,
            clock,
            policy,
        }
    }

    /// Places a hold on `seat_id` for `user_id`.
    ///
    /// A non-empty `idempotency_token` that already belongs to a reservation
    /// returns that reservation unchanged. Without a token a fresh one is
    /// generated, so every such call is a new claim.
    #[tracing::instrument(skip(self, idempotency_token), fields(%user_id, %seat_id))]
    pub async fn claim(
        &self,
        user_id: UserId,
        seat_id: SeatId,
        idempotency_token: Option<String>,
    ) -> Result<Reservation> {
        let started = Instant::now();
        let result = self.claim_seat(user_id, seat_id, idempotency_token).await;

        let outcome = match &result {
            Ok((_, Claimed::Held)) => "held",
            Ok((_, Claimed::Replayed)) => "replayed",
            Err(e) => e.kind(),
        };
        metrics::counter!("booking_claims_total", "outcome" => outcome).increment(1);
        metrics::histogram!("booking_claim_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok((reservation, claimed)) => {
                if claimed == Claimed::Held {
                    tracing::info!(
                        reservation_id = %reservation.id,
                        hold_expires_at = %reservation.hold_expires_at,
                        "seat held"
                    );
                }
                Ok(reservation)
            }
            Err(e) => {
                tracing::warn!(error = %e, "claim rejected");
                Err(e)
            }
        }
    }

    async fn claim_seat(
        &self,
        user_id: UserId,
        seat_id: SeatId,
        idempotency_token: Option<String>,
    ) -> Result<(Reservation, Claimed)> {
        let token = idempotency_token.filter(|t| !t.is_empty());

        // 1. Replay before any lock or seat work
        if let Some(token) = &token
            && let Some(existing) = self.store.find_reservation_by_token(token).await?
        {
            return Ok((existing, Claimed::Replayed));
        }
        let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());

        // 2. Serialize on the seat, then run the unit of work inside the lock
        let key = seat_lock_key(seat_id);
        let result = self
            .locks
            .with_lock(&key, || self.hold_seat(user_id, seat_id, token.clone()))
            .await;

        // A concurrent claim with the same token on another seat won the insert.
        match result {
            Err(BookingError::Store(StoreError::DuplicateIdempotencyToken { .. })) => {
                match self.store.find_reservation_by_token(&token).await? {
                    Some(existing) => Ok((existing, Claimed::Replayed)),
                    None => result,
                }
            }
            other => other,
        }
    }

    async fn hold_seat(
        &self,
        user_id: UserId,
        seat_id: SeatId,
        token: String,
    ) -> Result<(Reservation, Claimed)> {
        let mut tx = self.store.begin().await?;
        let result = self.hold_seat_in(&mut tx, user_id, seat_id, token).await;
        finish(tx, result).await.map_err(already_held)
    }

    async fn hold_seat_in(
        &self,
        tx: &mut S::Tx,
        user_id: UserId,
        seat_id: SeatId,
        token: String,
    ) -> Result<(Reservation, Claimed)> {
        // 3. Re-check the token now that claims on this seat are serialized
        if let Some(existing) = tx.find_reservation_by_token(&token).await? {
            return Ok((existing, Claimed::Replayed));
        }

        let seat = tx
            .find_seat_for_update(seat_id)
            .await?
            .ok_or(BookingError::SeatNotFound(seat_id))?;

        // 4. Availability
        if !seat.is_available() {
            return Err(BookingError::SeatUnavailable(seat_id));
        }
        if tx
            .exists_reservation_by_seat_and_status(seat_id, ReservationStatus::Hold)
            .await?
        {
            return Err(BookingError::ReservationAlreadyHeld(seat_id));
        }

        // 5. Price in minor units
        let amount =
            Money::from_major(seat.price).ok_or(BookingError::InvalidPrice(seat.schedule_id))?;

        // 6. Hold
        let now = self.clock.now();
        let reservation = tx
            .insert_reservation(NewReservation {
                user_id,
                seat_id,
                schedule_id: seat.schedule_id,
                hold_expires_at: now + self.policy.hold_duration,
                amount,
                idempotency_token: token,
                created_at: now,
            })
            .await?;

        Ok((reservation, Claimed::Held))
    }

    /// Cancels a reservation that is still on hold, freeing its seat.
    #[tracing::instrument(skip(self), fields(%reservation_id))]
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let key = reservation_lock_key(reservation_id);
        let reservation = self
            .locks
            .with_lock(&key, || self.cancel_hold(reservation_id))
            .await?;

        tracing::info!(seat_id = %reservation.seat_id, "reservation cancelled");
        Ok(reservation)
    }

    async fn cancel_hold(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;
        let result = Self::cancel_in(&mut tx, reservation_id).await;
        finish(tx, result).await
    }

    async fn cancel_in(tx: &mut S::Tx, reservation_id: ReservationId) -> Result<Reservation> {
        let reservation = tx
            .find_reservation_for_update(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))?;

        if !reservation.status.can_transition_to(ReservationStatus::Cancelled) {
            return Err(BookingError::InvalidReservationState {
                id: reservation_id,
                status: reservation.status,
            });
        }

        tx.update_reservation_status(reservation_id, ReservationStatus::Cancelled)
            .await?;
        Ok(Reservation {
            status: ReservationStatus::Cancelled,
            ..reservation
        })
    }

    /// Loads a reservation by id.
    pub async fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .find_reservation(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound(reservation_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use common::{ConcertId, ManualClock, ScheduleId};
    use distributed_lock::{InMemoryLock, LockSettings};
    use store::{InMemoryStore, Schedule, Seat, SeatGrade, SeatStatus, UnitOfWork};

    use super::*;

    async fn service() -> (
        ReservationService<InMemoryStore, InMemoryLock, ManualClock>,
        InMemoryStore,
        InMemoryLock,
        ManualClock,
    ) {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.save_schedule(&Schedule {
            id: ScheduleId::new(1),
            concert_id: ConcertId::new(1),
            price: 150,
        })
        .await
        .unwrap();
        tx.save_seat(&Seat {
            id: SeatId::new(1),
            schedule_id: ScheduleId::new(1),
            seat_number: 1,
            grade: SeatGrade::Special,
            status: SeatStatus::Available,
            price: 0,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let lock = InMemoryLock::new();
        let clock = ManualClock::new(Utc::now());
        let locks = LockManager::with_settings(
            lock.clone(),
            LockSettings {
                ttl: Duration::from_secs(30),
                retry_interval: Duration::from_millis(5),
                max_wait: Duration::from_millis(200),
            },
        );
        let service =
            ReservationService::new(store.clone(), locks, clock.clone(), BookingPolicy::default());
        (service, store, lock, clock)
    }

    #[tokio::test]
    async fn claim_holds_seat_at_schedule_price() {
        let (service, store, lock, clock) = service().await;

        let reservation = service
            .claim(UserId::new(9), SeatId::new(1), None)
            .await
            .unwrap();

        assert_eq!(reservation.status, ReservationStatus::Hold);
        assert_eq!(reservation.amount, Money::from_minor(15_000));
        assert_eq!(
            reservation.hold_expires_at,
            clock.now() + chrono::Duration::minutes(10)
        );
        assert!(!reservation.idempotency_token.is_empty());
        assert_eq!(
            store.find_seat(SeatId::new(1)).await.unwrap().unwrap().status,
            SeatStatus::Held
        );
        assert!(!lock.is_held("seat:1"));
    }

    #[tokio::test]
    async fn claim_with_known_token_replays_without_locking() {
        let (service, store, lock, _) = service().await;
        let first = service
            .claim(UserId::new(9), SeatId::new(1), Some("abc".to_string()))
            .await
            .unwrap();
        let acquisitions = lock.acquisition_count();

        let second = service
            .claim(UserId::new(9), SeatId::new(1), Some("abc".to_string()))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(lock.acquisition_count(), acquisitions);
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn empty_token_is_treated_as_absent() {
        let (service, _, _, _) = service().await;

        let reservation = service
            .claim(UserId::new(9), SeatId::new(1), Some(String::new()))
            .await
            .unwrap();

        assert!(!reservation.idempotency_token.is_empty());
    }

    #[tokio::test]
    async fn held_seat_is_unavailable() {
        let (service, _, lock, _) = service().await;
        service
            .claim(UserId::new(1), SeatId::new(1), None)
            .await
            .unwrap();

        let err = service
            .claim(UserId::new(2), SeatId::new(1), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::SeatUnavailable(id) if id == SeatId::new(1)));
        assert!(!lock.is_held("seat:1"));
    }

    #[tokio::test]
    async fn unknown_seat_is_not_found() {
        let (service, _, _, _) = service().await;

        let err = service
            .claim(UserId::new(1), SeatId::new(404), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::SeatNotFound(_)));
    }

    #[tokio::test]
    async fn busy_seat_lock_times_out() {
        let (service, store, lock, _) = service().await;
        lock.try_acquire("seat:1", Duration::from_secs(30))
            .await
            .unwrap();

        let err = service
            .claim(UserId::new(1), SeatId::new(1), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::LockTimeout { ref key } if key == "seat:1"));
        assert!(err.is_retriable());
        assert_eq!(store.reservation_count().await, 0);
    }

    #[test]
    fn store_hold_conflict_maps_to_already_held() {
        let err = already_held(BookingError::Store(StoreError::ConcurrentHold {
            seat_id: SeatId::new(1),
        }));
        assert!(matches!(err, BookingError::ReservationAlreadyHeld(id) if id == SeatId::new(1)));

        let err = already_held(BookingError::SeatUnavailable(SeatId::new(1)));
        assert!(matches!(err, BookingError::SeatUnavailable(_)));
    }

    #[tokio::test]
    async fn conflicting_hold_caught_at_commit_is_already_held() {
        let (service, store, _, _) = service().await;
        let mut tx = store.begin().await.unwrap();
        let result = service
            .hold_seat_in(&mut tx, UserId::new(1), SeatId::new(1), "late".to_string())
            .await;
        assert!(result.is_ok());

        // A writer that skips the seat row lock commits a hold first.
        let mut rival = store.begin().await.unwrap();
        rival
            .insert_reservation(NewReservation {
                user_id: UserId::new(2),
                seat_id: SeatId::new(1),
                schedule_id: ScheduleId::new(1),
                hold_expires_at: Utc::now() + chrono::Duration::minutes(10),
                amount: Money::from_minor(15_000),
                idempotency_token: "rival".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        rival.commit().await.unwrap();

        let err = finish(tx, result).await.map_err(already_held).unwrap_err();

        assert!(matches!(err, BookingError::ReservationAlreadyHeld(id) if id == SeatId::new(1)));
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn failed_commit_releases_lock_and_surfaces_error() {
        let (service, store, lock, _) = service().await;
        store.set_fail_on_commit(true);

        let err = service
            .claim(UserId::new(1), SeatId::new(1), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Store(StoreError::Database(_))));
        assert!(!lock.is_held("seat:1"));
        store.set_fail_on_commit(false);
        assert!(
            service
                .claim(UserId::new(1), SeatId::new(1), None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn cancel_frees_the_seat() {
        let (service, store, _, _) = service().await;
        let reservation = service
            .claim(UserId::new(1), SeatId::new(1), None)
            .await
            .unwrap();

        let cancelled = service.cancel(reservation.id).await.unwrap();

        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(
            service.get(reservation.id).await.unwrap().status,
            ReservationStatus::Cancelled
        );
        assert!(
            store
                .find_seat(SeatId::new(1))
                .await
                .unwrap()
                .unwrap()
                .is_available()
        );

        let err = service.cancel(reservation.id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidReservationState {
                status: ReservationStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn get_unknown_reservation_is_not_found() {
        let (service, _, _, _) = service().await;

        let err = service.get(ReservationId::new(1)).await.unwrap_err();

        assert!(matches!(err, BookingError::ReservationNotFound(_)));
    }
}
