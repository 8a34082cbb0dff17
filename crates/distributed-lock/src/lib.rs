//! Distributed mutual exclusion for the booking system.
//!
//! A lock is a key set with "set if absent" semantics and a TTL. The TTL is
//! only a fallback for crashed holders: [`LockManager::with_lock`] always
//! releases the key once the guarded work has finished.

pub mod error;
pub mod lock;
pub mod manager;
pub mod memory;
pub mod redis_lock;

pub use error::{LockError, Result};
pub use lock::DistributedLock;
pub use manager::{LockGuard, LockManager, LockSettings};
pub use memory::InMemoryLock;
pub use redis_lock::RedisLock;
