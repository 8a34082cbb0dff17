use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// The primitive a lock backend has to offer.
///
/// `try_acquire` must be a single atomic "set if absent, with expiry"
/// operation. `release` is an unconditional delete; callers guarantee it is
/// only invoked by the party that acquired the key.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempts to take `key` for `ttl`.
    ///
    /// Returns `Ok(true)` if the key was free and is now held, `Ok(false)` if
    /// someone else holds it.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key`.
    async fn release(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<L: DistributedLock + ?Sized> DistributedLock for Arc<L> {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        (**self).try_acquire(key, ttl).await
    }

    async fn release(&self, key: &str) -> Result<()> {
        (**self).release(key).await
    }
}
