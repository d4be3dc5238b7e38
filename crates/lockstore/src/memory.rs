//! In-process lock store

use crate::{new_token, LockError, LockHandle, LockResult, LockStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct Entry {
    holder: Option<Holder>,
    value: Option<String>,
    acquire_calls: u64,
}

#[derive(Debug)]
struct Holder {
    token: String,
    expires_at: Instant,
}

/// Lock store that lives inside one process.
///
/// Exclusion only covers tasks sharing this instance, so it backs tests and
/// single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
    released: Notify,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the value stored under `name`.
    pub fn with_value(self, name: &str, value: &str) -> Self {
        self.entries().entry(name.to_string()).or_default().value = Some(value.to_string());
        self
    }

    /// Number of `acquire` calls made for `name`, successful or not.
    pub fn acquire_count(&self, name: &str) -> u64 {
        self.entries().get(name).map_or(0, |entry| entry.acquire_calls)
    }

    /// Stored value, read without taking the lock.
    pub fn peek(&self, name: &str) -> Option<String> {
        self.entries().get(name).and_then(|entry| entry.value.clone())
    }

    /// Whether `name` has an unexpired holder.
    pub fn is_held(&self, name: &str) -> bool {
        let now = Instant::now();
        self.entries()
            .get(name)
            .and_then(|entry| entry.holder.as_ref())
            .map_or(false, |holder| holder.expires_at > now)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn held_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    handle: &LockHandle,
) -> LockResult<&'a mut Entry> {
    match entries.get_mut(&handle.name) {
        Some(entry)
            if entry
                .holder
                .as_ref()
                .map_or(false, |holder| holder.token == handle.token) =>
        {
            Ok(entry)
        }
        _ => Err(LockError::NotHeld(handle.name.clone())),
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, name: &str, ttl: Duration, wait: Duration) -> LockResult<LockHandle> {
        let started = Instant::now();
        let deadline = started + wait;
        self.entries().entry(name.to_string()).or_default().acquire_calls += 1;

        loop {
            // Register for wakeups before inspecting the holder so a release in
            // between is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy_until = {
                let mut entries = self.entries();
                let entry = entries.entry(name.to_string()).or_default();
                let now = Instant::now();
                match &entry.holder {
                    Some(holder) if holder.expires_at > now => holder.expires_at,
                    _ => {
                        let token = new_token();
                        entry.holder = Some(Holder {
                            token: token.clone(),
                            expires_at: now + ttl,
                        });
                        debug!(lock = name, "lock acquired");
                        return Ok(LockHandle::new(name, token, ttl, entry.value.clone()));
                    }
                }
            };

            if Instant::now() >= deadline {
                return Err(LockError::WaitTimeout {
                    name: name.to_string(),
                    waited: started.elapsed(),
                });
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(busy_until.min(deadline)) => {}
            }
        }
    }

    async fn get_value(&self, handle: &LockHandle) -> LockResult<Option<String>> {
        let mut entries = self.entries();
        Ok(held_entry(&mut entries, handle)?.value.clone())
    }

    async fn set_value(&self, handle: &LockHandle, value: &str) -> LockResult<()> {
        let mut entries = self.entries();
        held_entry(&mut entries, handle)?.value = Some(value.to_string());
        Ok(())
    }

    async fn release(&self, handle: LockHandle) -> LockResult<()> {
        {
            let mut entries = self.entries();
            held_entry(&mut entries, &handle)?.holder = None;
        }
        debug!(lock = %handle.name, "lock released");
        self.released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_value_survives_release() {
        let store = MemoryLockStore::new();

        let handle = store.acquire("seq", TTL, Duration::ZERO).await.unwrap();
        assert_eq!(handle.value, None);
        store.set_value(&handle, "7").await.unwrap();
        assert_eq!(store.get_value(&handle).await.unwrap(), Some("7".to_string()));
        store.release(handle).await.unwrap();

        let handle = store.acquire("seq", TTL, Duration::ZERO).await.unwrap();
        assert_eq!(handle.value, Some("7".to_string()));
        store.release(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_acquirer_waits_for_release() {
        let store = Arc::new(MemoryLockStore::new());
        let first = store.acquire("seq", TTL, Duration::ZERO).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.acquire("seq", TTL, Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        store.release(first).await.unwrap();
        let second = waiter.await.unwrap().unwrap();
        assert!(store.is_held("seq"));
        store.release(second).await.unwrap();
        assert!(!store.is_held("seq"));
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let store = MemoryLockStore::new();
        let _held = store.acquire("seq", TTL, Duration::ZERO).await.unwrap();

        let err = store
            .acquire("seq", TTL, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_wait_timeout());
    }

    #[tokio::test]
    async fn test_expired_holder_is_displaced() {
        let store = MemoryLockStore::new();
        let stale = store
            .acquire("seq", Duration::from_millis(20), Duration::ZERO)
            .await
            .unwrap();

        let fresh = store
            .acquire("seq", TTL, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(
            store.set_value(&stale, "1").await,
            Err(LockError::NotHeld(_))
        ));
        assert!(matches!(store.release(stale).await, Err(LockError::NotHeld(_))));
        store.set_value(&fresh, "2").await.unwrap();
        store.release(fresh).await.unwrap();
        assert_eq!(store.peek("seq"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_acquire_count_includes_failures() {
        let store = MemoryLockStore::new().with_value("seq", "0");
        assert_eq!(store.acquire_count("seq"), 0);

        let held = store.acquire("seq", TTL, Duration::ZERO).await.unwrap();
        let _ = store.acquire("seq", TTL, Duration::ZERO).await;
        assert_eq!(store.acquire_count("seq"), 2);
        assert_eq!(store.acquire_count("other"), 0);
        store.release(held).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_serialized() {
        let store = Arc::new(MemoryLockStore::new().with_value("counter", "0"));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let handle = store
                        .acquire("counter", TTL, Duration::from_secs(10))
                        .await
                        .unwrap();
                    let current: i64 = handle.value.as_deref().unwrap().parse().unwrap();
                    tokio::task::yield_now().await;
                    store.set_value(&handle, &(current + 1).to_string()).await.unwrap();
                    store.release(handle).await.unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.peek("counter"), Some("32".to_string()));
    }
}
