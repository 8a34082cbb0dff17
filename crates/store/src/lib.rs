//! Storage layer for the seat booking system.
//!
//! Every write goes through a [`UnitOfWork`]: rows locked with a
//! `*_for_update` call stay locked until the unit of work commits or is
//! dropped, and nothing it wrote is visible to others before commit.
//! [`InMemoryStore`] reproduces those semantics for tests;
//! [`PostgresStore`] maps them onto a database transaction.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryUnitOfWork};
pub use model::{
    LedgerEntry, LedgerType, NewLedgerEntry, NewPayment, NewReservation, Payment, PaymentStatus,
    Reservation, ReservationStatus, Schedule, Seat, SeatGrade, SeatStatus, Wallet,
    DEFAULT_CURRENCY,
};
pub use postgres::{PostgresStore, PostgresUnitOfWork};
pub use repository::{
    LedgerRepository, PaymentRepository, ReservationRepository, SeatRepository, Store,
    UnitOfWork, WalletRepository,
};
