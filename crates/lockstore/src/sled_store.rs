use crate::{new_token, LockError, LockHandle, LockResult, LockStore};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Transactional, Tree};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Holder record stored under the lock name
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    token: String,
    /// Wall-clock expiry in unix milliseconds, comparable across processes
    expires_at_ms: i64,
}

impl LockRecord {
    fn decode(bytes: &[u8]) -> LockResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn encode(&self) -> LockResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

enum Attempt {
    Acquired(Option<String>),
    Busy { expires_at_ms: i64 },
}

/// Lock store backed by an embedded sled database.
///
/// Holder records are swapped in atomically with `compare_and_swap`, so every
/// handle opened on the same database sees one holder per name. Front it with
/// the lock server to share it between processes.
pub struct SledLockStore {
    locks: Tree,
    values: Tree,
    poll_interval: Duration,
}

impl SledLockStore {
    pub fn open<P: AsRef<Path>>(path: P) -> LockResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Create a store on an existing sled::Db
    pub fn from_db(db: &sled::Db) -> LockResult<Self> {
        Ok(Self {
            locks: db.open_tree("locks")?,
            values: db.open_tree("values")?,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn try_acquire(&self, name: &str, token: &str, ttl: Duration) -> LockResult<Attempt> {
        let now = now_ms();
        let current = self.locks.get(name)?;
        if let Some(bytes) = &current {
            let record = LockRecord::decode(bytes)?;
            if record.expires_at_ms > now {
                return Ok(Attempt::Busy {
                    expires_at_ms: record.expires_at_ms,
                });
            }
        }

        let record = LockRecord {
            token: token.to_string(),
            expires_at_ms: now + ttl.as_millis() as i64,
        };
        match self.locks.compare_and_swap(name, current, Some(record.encode()?))? {
            Ok(()) => {
                let value = self.values.get(name)?.map(ivec_to_string).transpose()?;
                Ok(Attempt::Acquired(value))
            }
            // Somebody else swapped first; look again right away.
            Err(_) => Ok(Attempt::Busy { expires_at_ms: now }),
        }
    }

    fn holder_check(
        locks: &sled::transaction::TransactionalTree,
        handle: &LockHandle,
    ) -> Result<(), ConflictableTransactionError<LockError>> {
        let record = locks
            .get(handle.name.as_bytes())?
            .map(|bytes| LockRecord::decode(&bytes))
            .transpose()
            .map_err(ConflictableTransactionError::Abort)?;
        match record {
            Some(record) if record.token == handle.token => Ok(()),
            _ => Err(ConflictableTransactionError::Abort(LockError::NotHeld(
                handle.name.clone(),
            ))),
        }
    }

    fn backoff(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.poll_interval.as_millis() as u64 / 2);
        self.poll_interval + Duration::from_millis(jitter)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ivec_to_string(bytes: IVec) -> LockResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| LockError::Codec(e.to_string()))
}

fn flatten<T>(result: Result<T, TransactionError<LockError>>) -> LockResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(LockError::Storage(e)),
    }
}

#[async_trait]
impl LockStore for SledLockStore {
    async fn acquire(&self, name: &str, ttl: Duration, wait: Duration) -> LockResult<LockHandle> {
        let started = Instant::now();
        let deadline = started + wait;
        let token = new_token();

        loop {
            match self.try_acquire(name, &token, ttl)? {
                Attempt::Acquired(value) => {
                    debug!(lock = name, "lock acquired");
                    return Ok(LockHandle::new(name, token, ttl, value));
                }
                Attempt::Busy { expires_at_ms } => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::WaitTimeout {
                            name: name.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    let until_expiry = Duration::from_millis((expires_at_ms - now_ms()).max(0) as u64);
                    let pause = self.backoff().min(until_expiry.max(Duration::from_millis(1)));
                    tokio::time::sleep_until((now + pause).min(deadline)).await;
                }
            }
        }
    }

    async fn get_value(&self, handle: &LockHandle) -> LockResult<Option<String>> {
        let value = flatten((&self.locks, &self.values).transaction(|(locks, values)| {
            Self::holder_check(locks, handle)?;
            Ok(values.get(handle.name.as_bytes())?)
        }))?;
        value.map(ivec_to_string).transpose()
    }

    async fn set_value(&self, handle: &LockHandle, value: &str) -> LockResult<()> {
        flatten((&self.locks, &self.values).transaction(|(locks, values)| {
            Self::holder_check(locks, handle)?;
            values.insert(handle.name.as_bytes(), value.as_bytes())?;
            Ok(())
        }))
    }

    async fn release(&self, handle: LockHandle) -> LockResult<()> {
        flatten(self.locks.transaction(|locks| {
            Self::holder_check(locks, &handle)?;
            locks.remove(handle.name.as_bytes())?;
            Ok(())
        }))?;
        debug!(lock = %handle.name, "lock released");
        Ok(())
    }
}
