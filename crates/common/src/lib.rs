//! Shared types for the seat booking system.
//!
//! Identifiers are storage-assigned 64-bit integers wrapped in newtypes so a
//! seat id can never be passed where a reservation id is expected.

pub mod clock;
pub mod money;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use money::{MINOR_UNITS_PER_MAJOR, Money};
pub use types::{
    ConcertId, LedgerEntryId, PaymentId, ReservationId, ScheduleId, SeatId, UserId, WalletId,
};
