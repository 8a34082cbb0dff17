pub mod health;
pub mod metrics;
pub mod rankings;
pub mod reservations;
pub mod seats;
