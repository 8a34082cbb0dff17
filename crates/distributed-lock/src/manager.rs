//! Acquire-with-retry and scoped release on top of a [`DistributedLock`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;

use crate::{DistributedLock, LockError, Result};

/// Timing policy for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Self-expiry of a held key. Must exceed the longest guarded unit of work.
    pub ttl: Duration,
    /// Delay between acquisition attempts while the key is held elsewhere.
    pub retry_interval: Duration,
    /// Total time to keep retrying before giving up with a timeout.
    pub max_wait: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Runs work while holding a named lock.
///
/// The manager is a long-lived handle; clone it into every component that
/// needs mutual exclusion.
pub struct LockManager<L> {
    lock: Arc<L>,
    settings: LockSettings,
}

impl<L> Clone for LockManager<L> {
    fn clone(&self) -> Self {
        Self {
            lock: Arc::clone(&self.lock),
            settings: self.settings,
        }
    }
}

impl<L: DistributedLock + 'static> LockManager<L> {
    /// Creates a manager with default settings.
    pub fn new(lock: L) -> Self {
        Self::with_settings(lock, LockSettings::default())
    }

    /// Creates a manager with explicit settings.
    pub fn with_settings(lock: L, settings: LockSettings) -> Self {
        Self {
            lock: Arc::new(lock),
            settings,
        }
    }

    /// Returns the acquisition policy.
    pub fn settings(&self) -> LockSettings {
        self.settings
    }

    /// Returns the underlying lock backend.
    pub fn backend(&self) -> &L {
        &self.lock
    }

    /// Polls until `key` is acquired or the wait budget runs out.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, key: &str) -> Result<LockGuard<L>> {
        let started = Instant::now();

        loop {
            if self.lock.try_acquire(key, self.settings.ttl).await? {
                metrics::histogram!("lock_acquire_wait_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::debug!(%key, "lock acquired");
                return Ok(LockGuard {
                    lock: Arc::clone(&self.lock),
                    key: key.to_string(),
                    armed: true,
                });
            }

            let waited = started.elapsed();
            if waited >= self.settings.max_wait {
                metrics::counter!("lock_timeouts_total").increment(1);
                tracing::warn!(%key, ?waited, "lock acquisition timed out");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited,
                });
            }

            tokio::time::sleep(self.settings.retry_interval).await;
        }
    }

    /// Acquires `key`, runs `body`, then releases `key`.
    ///
    /// Release happens after `body` has finished whether it returned `Ok`,
    /// returned `Err` or panicked; a panic is resumed once the key is
    /// released. Put the whole unit of work, commit included, inside `body`.
    pub async fn with_lock<F, Fut, T, E>(&self, key: &str, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire(key).await?;
        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        guard.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A held lock key.
///
/// Call [`LockGuard::release`] when done. If the guard is dropped while still
/// held (the owning future was cancelled), a best-effort release is spawned on
/// the current runtime and the TTL covers the rest.
pub struct LockGuard<L: DistributedLock + 'static> {
    lock: Arc<L>,
    key: String,
    armed: bool,
}

impl<L: DistributedLock + 'static> LockGuard<L> {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the key. Failures are logged and swallowed: an unreleased key
    /// self-heals when its TTL runs out.
    pub async fn release(mut self) {
        self.armed = false;
        release_logged(self.lock.as_ref(), &self.key).await;
    }
}

impl<L: DistributedLock + 'static> Drop for LockGuard<L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let lock = Arc::clone(&self.lock);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_logged(lock.as_ref(), &key).await;
                });
            }
            Err(_) => {
                tracing::warn!(%key, "lock guard dropped outside a runtime; relying on TTL");
            }
        }
    }
}

async fn release_logged<L: DistributedLock + ?Sized>(lock: &L, key: &str) {
    match lock.release(key).await {
        Ok(()) => tracing::debug!(%key, "lock released"),
        Err(e) => {
            metrics::counter!("lock_release_failures_total").increment(1);
            tracing::error!(%key, error = %e, "failed to release lock; it will expire by TTL");
        }
    }
}
