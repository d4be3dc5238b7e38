//! Named, TTL-bounded mutual-exclusion locks that each guard one string value.
//!
//! A [`LockStore`] hands out a [`LockHandle`] per acquisition. The value stored
//! under a lock can only be read or written through a handle whose owner token
//! still holds that lock. The TTL only matters to other acquirers: once it
//! lapses, the lock can be taken over, and the old handle stops working.
//!
//! Backends:
//! - [`MemoryLockStore`]: one process, used by tests and single-instance setups
//! - [`SledLockStore`]: one host, backed by an embedded sled database
//! - [`RemoteLockStore`]: any number of processes sharing a `lockd` server

pub mod error;
pub mod memory;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod sled_store;

pub use error::{LockError, LockResult};
pub use memory::MemoryLockStore;
pub use remote::RemoteLockStore;
pub use server::lock_router;
pub use sled_store::SledLockStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proof of holding a named lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    /// Lock name
    pub name: String,
    /// Owner token, unique per acquisition
    pub token: String,
    /// Time after which other acquirers may take the lock over
    pub ttl: Duration,
    /// Value stored under the lock at acquisition time
    pub value: Option<String>,
}

impl LockHandle {
    pub fn new(name: impl Into<String>, token: impl Into<String>, ttl: Duration, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            ttl,
            value,
        }
    }
}

/// Distributed lock and value store.
///
/// Implementations must give mutual exclusion per name across every process
/// that shares the store, not just within the calling process.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire `name`, waiting at most `wait` for the current holder to release
    /// it or for its TTL to lapse.
    async fn acquire(&self, name: &str, ttl: Duration, wait: Duration) -> LockResult<LockHandle>;

    /// Read the value stored under a held lock.
    async fn get_value(&self, handle: &LockHandle) -> LockResult<Option<String>>;

    /// Replace the value stored under a held lock.
    async fn set_value(&self, handle: &LockHandle, value: &str) -> LockResult<()>;

    /// Release a held lock. The stored value survives.
    async fn release(&self, handle: LockHandle) -> LockResult<()>;
}

pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
