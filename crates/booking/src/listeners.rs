//! Listeners reacting to completed payments.

use async_trait::async_trait;
use store::{ReservationStatus, Store};

use crate::Result;
use crate::events::PaymentCompleted;
use crate::notifier::PaymentListener;
use crate::ranking::SoldOutRanking;

/// Records a schedule in the sold-out ranking once every seat is paid.
pub struct SoldOutRankingListener<S, R> {
    store: S,
    ranking: R,
}

impl<S: Store, R: SoldOutRanking> SoldOutRankingListener<S, R> {
    pub fn new(store: S, ranking: R) -> Self {
        Self { store, ranking }
    }
}

#[async_trait]
impl<S: Store, R: SoldOutRanking> PaymentListener for SoldOutRankingListener<S, R> {
    fn name(&self) -> &'static str {
        "sold_out_ranking"
    }

    async fn on_payment_completed(&self, event: &PaymentCompleted) -> Result<()> {
        let schedule_id = event.schedule_id;
        let total = self.store.count_seats_by_schedule(schedule_id).await?;
        let paid = self
            .store
            .count_reservations_by_schedule_and_status(schedule_id, ReservationStatus::Paid)
            .await?;

        tracing::debug!(%schedule_id, total, paid, "sold-out check");
        if total > 0 && paid >= total {
            self.ranking
                .record_sold_out(schedule_id, event.approved_at)
                .await?;
            tracing::info!(%schedule_id, "schedule sold out");
        }
        Ok(())
    }
}

/// Forwards completed payments to the data platform.
///
/// There is no real platform to deliver to; the serialized payload is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPlatformListener;

#[async_trait]
impl PaymentListener for DataPlatformListener {
    fn name(&self) -> &'static str {
        "data_platform"
    }

    async fn on_payment_completed(&self, event: &PaymentCompleted) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(%payload, "payment forwarded to data platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{ConcertId, Money, PaymentId, ReservationId, ScheduleId, SeatId, UserId};
    use store::{
        InMemoryStore, NewReservation, ReservationRepository, Schedule, Seat, SeatGrade,
        SeatRepository, SeatStatus, UnitOfWork,
    };

    use super::*;
    use crate::ranking::InMemorySoldOutRanking;

    async fn store_with_seats(paid: usize, seats: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.save_schedule(&Schedule {
            id: ScheduleId::new(1),
            concert_id: ConcertId::new(1),
            price: 100,
        })
        .await
        .unwrap();
        for n in 0..seats {
            let seat_id = SeatId::new(n as i64 + 1);
            tx.save_seat(&Seat {
                id: seat_id,
                schedule_id: ScheduleId::new(1),
                seat_number: n as i32 + 1,
                grade: SeatGrade::Vip,
                status: SeatStatus::Available,
                price: 0,
            })
            .await
            .unwrap();
            if n < paid {
                let reservation = tx
                    .insert_reservation(NewReservation {
                        user_id: UserId::new(1),
                        seat_id,
                        schedule_id: ScheduleId::new(1),
                        hold_expires_at: Utc::now(),
                        amount: Money::from_minor(10_000),
                        idempotency_token: format!("r{n}"),
                        created_at: Utc::now(),
                    })
                    .await
                    .unwrap();
                tx.update_reservation_status(reservation.id, ReservationStatus::Paid)
                    .await
                    .unwrap();
            }
        }
        tx.commit().await.unwrap();
        store
    }

    fn event() -> PaymentCompleted {
        PaymentCompleted {
            payment_id: PaymentId::new(1),
            user_id: UserId::new(1),
            reservation_id: ReservationId::new(1),
            schedule_id: ScheduleId::new(1),
            amount: Money::from_minor(10_000),
            idempotency_token: "pay".to_string(),
            approved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_schedule_once_every_seat_is_paid() {
        let ranking = InMemorySoldOutRanking::new();
        let listener = SoldOutRankingListener::new(store_with_seats(2, 2).await, ranking.clone());

        listener.on_payment_completed(&event()).await.unwrap();

        assert_eq!(ranking.rank(ScheduleId::new(1)).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn ignores_schedule_with_unpaid_seats() {
        let ranking = InMemorySoldOutRanking::new();
        let listener = SoldOutRankingListener::new(store_with_seats(1, 2).await, ranking.clone());

        listener.on_payment_completed(&event()).await.unwrap();

        assert!(ranking.top(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn data_platform_listener_accepts_events() {
        assert!(
            DataPlatformListener
                .on_payment_completed(&event())
                .await
                .is_ok()
        );
    }
}
