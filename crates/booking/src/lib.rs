//! Seat booking: claim, payment, expiry and post-payment notification.
//!
//! A claim runs under the distributed `seat:{id}` lock and, inside it, a
//! unit of work that row-locks the seat, so a seat is held by at most one
//! reservation. Payment runs under `reservation:{id}` and debits the wallet
//! with a conditional decrement. Both operations are idempotent on a
//! caller-supplied token. Once a payment commits, a [`PaymentCompleted`]
//! event is handed to the [`NotificationWorker`] without blocking the payer.

pub mod error;
pub mod events;
pub mod listeners;
pub mod notifier;
pub mod payment;
pub mod policy;
pub mod ranking;
pub mod reservation;
pub mod sweeper;
mod unit_of_work;

pub use error::{BookingError, Result};
pub use events::PaymentCompleted;
pub use listeners::{DataPlatformListener, SoldOutRankingListener};
pub use notifier::{NotificationWorker, PaymentListener, PaymentPublisher};
pub use payment::PaymentService;
pub use policy::{BookingPolicy, reservation_lock_key, seat_lock_key};
pub use ranking::{
    InMemorySoldOutRanking, RedisSoldOutRanking, SOLD_OUT_RANKING_KEY, SoldOutEntry,
    SoldOutRanking,
};
pub use reservation::ReservationService;
pub use sweeper::ExpirationSweeper;
