//! Shared application state.

use std::sync::Arc;

use booking::{
    BookingPolicy, PaymentPublisher, PaymentService, ReservationService, SoldOutRanking,
};
use common::SystemClock;
use distributed_lock::{DistributedLock, LockManager};
use store::Store;

/// Handles shared by every request handler.
pub struct AppState<S, L> {
    pub store: S,
    pub reservations: ReservationService<S, L, SystemClock>,
    pub payments: PaymentService<S, L, SystemClock>,
    pub ranking: Arc<dyn SoldOutRanking>,
}

impl<S, L> AppState<S, L>
where
    S: Store + Clone,
    L: DistributedLock + 'static,
{
    pub fn new(
        store: S,
        locks: LockManager<L>,
        ranking: Arc<dyn SoldOutRanking>,
        policy: BookingPolicy,
        publisher: PaymentPublisher,
    ) -> Self {
        Self {
            reservations: ReservationService::new(store.clone(), locks.clone(), SystemClock, policy),
            payments: PaymentService::new(store.clone(), locks, SystemClock, publisher),
            store,
            ranking,
        }
    }
}
