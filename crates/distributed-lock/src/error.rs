use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when acquiring or releasing a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The key stayed held by someone else for the whole wait budget.
    #[error("Timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    /// The Redis backend failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A non-Redis backend failed.
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
