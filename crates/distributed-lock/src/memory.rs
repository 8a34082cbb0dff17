//! In-process lock implementation for tests and single-node runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{DistributedLock, LockError, Result};

#[derive(Debug, Default)]
struct InMemoryLockState {
    /// Held keys and the instant their TTL runs out.
    held: HashMap<String, Instant>,
    fail_on_release: bool,
    acquisitions: u64,
}

/// In-memory lock with the same TTL semantics as the Redis implementation.
///
/// Clones share state, so one instance can stand in for the external lock
/// service across many tasks.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLock {
    state: Arc<Mutex<InMemoryLockState>>,
}

impl InMemoryLock {
    /// Creates a new lock service with no keys held.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryLockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent `release` fail, leaving the key to expire.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.state().fail_on_release = fail;
    }

    /// Returns true if `key` is currently held and not yet expired.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state()
            .held
            .get(key)
            .is_some_and(|expires_at| *expires_at > now)
    }

    /// Returns how many times a key was successfully acquired.
    pub fn acquisition_count(&self) -> u64 {
        self.state().acquisitions
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(expires_at) = state.held.get(key)
            && *expires_at > now
        {
            return Ok(false);
        }

        state.held.insert(key.to_string(), now + ttl);
        state.acquisitions += 1;
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_on_release {
            return Err(LockError::Backend(format!(
                "release of {key} rejected by test configuration"
            )));
        }
        state.held.remove(key);
        Ok(())
    }
}
