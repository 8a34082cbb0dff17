use common::SeatId;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another row already carries this idempotency token.
    #[error("Duplicate idempotency token for {entity}: {token}")]
    DuplicateIdempotencyToken { entity: &'static str, token: String },

    /// A second HOLD reservation was written for a seat that already has one.
    #[error("Seat {seat_id} already has a reservation on hold")]
    ConcurrentHold { seat_id: SeatId },

    /// A stored value could not be mapped onto the domain model.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
