//! Periodic expiry of stale holds.

use std::future::Future;
use std::time::Duration;

use common::Clock;
use store::Store;
use tokio::time::MissedTickBehavior;

use crate::Result;

/// Moves every HOLD whose expiry has passed to EXPIRED, freeing its seat.
///
/// Each pass is a single bulk update, so running it again is a no-op and
/// several sweepers on different nodes never double-count.
pub struct ExpirationSweeper<S, C> {
    store: S,
    clock: C,
    interval: Duration,
}

impl<S: Store, C: Clock> ExpirationSweeper<S, C> {
    pub fn new(store: S, clock: C, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Runs one pass and returns how many holds it expired.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<u64> {
        let now = self.clock.now();
        let expired = self.store.expire_holds(now).await?;

        if expired > 0 {
            metrics::counter!("reservations_expired_total").increment(expired);
            tracing::info!(expired, %now, "expired stale holds");
        } else {
            tracing::debug!("no stale holds");
        }
        Ok(expired)
    }

    /// Sweeps every `interval` until `shutdown` resolves.
    ///
    /// A failed pass is logged and the next tick tries again.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval = ?self.interval, "expiration sweeper started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "sweep failed");
                    }
                }
            }
        }
        tracing::info!("expiration sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{ConcertId, ManualClock, Money, ScheduleId, SeatId, UserId};
    use store::{
        InMemoryStore, NewReservation, ReservationRepository, ReservationStatus, Schedule, Seat,
        SeatGrade, SeatRepository, SeatStatus, UnitOfWork,
    };

    use super::*;

    async fn store_with_hold(expires_in: chrono::Duration, clock: &ManualClock) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.save_schedule(&Schedule {
            id: ScheduleId::new(1),
            concert_id: ConcertId::new(1),
            price: 100,
        })
        .await
        .unwrap();
        tx.save_seat(&Seat {
            id: SeatId::new(1),
            schedule_id: ScheduleId::new(1),
            seat_number: 1,
            grade: SeatGrade::Royal,
            status: SeatStatus::Available,
            price: 0,
        })
        .await
        .unwrap();
        tx.insert_reservation(NewReservation {
            user_id: UserId::new(1),
            seat_id: SeatId::new(1),
            schedule_id: ScheduleId::new(1),
            hold_expires_at: clock.now() + expires_in,
            amount: Money::from_minor(10_000),
            idempotency_token: "hold".to_string(),
            created_at: clock.now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn sweep_expires_only_past_holds() {
        let clock = ManualClock::new(Utc::now());
        let store = store_with_hold(chrono::Duration::minutes(10), &clock).await;
        let sweeper = ExpirationSweeper::new(store.clone(), clock.clone(), Duration::from_secs(60));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::minutes(10));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        let seat = store.find_seat(SeatId::new(1)).await.unwrap().unwrap();
        assert_eq!(seat.status, SeatStatus::Available);
        assert_eq!(
            store
                .count_reservations_by_schedule_and_status(
                    ScheduleId::new(1),
                    ReservationStatus::Expired
                )
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_until_shutdown() {
        let clock = ManualClock::new(Utc::now());
        let store = store_with_hold(chrono::Duration::seconds(-1), &clock).await;
        let sweeper = ExpirationSweeper::new(store.clone(), clock, Duration::from_secs(60));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(sweeper.run(async {
            let _ = stopped.await;
        }));
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(
            store.find_seat(SeatId::new(1)).await.unwrap().unwrap().status,
            SeatStatus::Available
        );
    }
}
