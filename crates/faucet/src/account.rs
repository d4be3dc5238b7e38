//! Shared account state kept in the lock store.
//!
//! Three named locks per network guard the faucet account:
//! `<network>-sequence`, `<network>-accountnumber` and `<network>-brokenflag`.
//! Whenever more than one is held they are taken in that order: sequence,
//! then broken flag, then account number.

use crate::error::{FaucetError, FaucetResult};
use crate::ledger::AccountSnapshot;
use drip_lockstore::{LockHandle, LockStore};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Stored flag value for a healthy account.
pub const HEALTHY_MARKER: &str = "no";

/// Broken flag as read from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenFlag {
    Healthy,
    /// Carries the stored reason text.
    Broken(String),
}

impl BrokenFlag {
    /// Anything but the healthy marker means broken, including an unset flag.
    pub fn decode(stored: Option<&str>) -> Self {
        match stored {
            Some(HEALTHY_MARKER) => BrokenFlag::Healthy,
            Some(reason) => BrokenFlag::Broken(reason.to_string()),
            None => BrokenFlag::Broken("account state not initialized".to_string()),
        }
    }

    pub fn encode(&self) -> &str {
        match self {
            BrokenFlag::Healthy => HEALTHY_MARKER,
            BrokenFlag::Broken(reason) if reason == HEALTHY_MARKER => "broken",
            BrokenFlag::Broken(reason) => reason,
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, BrokenFlag::Broken(_))
    }
}

/// Lock names for one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockNames {
    pub sequence: String,
    pub account_number: String,
    pub broken_flag: String,
}

impl LockNames {
    pub fn for_network(network_id: &str) -> Self {
        Self {
            sequence: format!("{}-sequence", network_id),
            account_number: format!("{}-accountnumber", network_id),
            broken_flag: format!("{}-brokenflag", network_id),
        }
    }
}

/// The sequence lock, held, together with the value it guards.
#[derive(Debug)]
pub struct SequenceSlot {
    handle: LockHandle,
    sequence: i64,
}

impl SequenceSlot {
    pub fn sequence(&self) -> i64 {
        self.sequence
    }
}

/// Account state tracker
pub struct AccountState {
    network_id: String,
    names: LockNames,
    store: Arc<dyn LockStore>,
    lock_ttl: Duration,
    lock_wait: Duration,
    /// Account number last read or written by this process
    account_number: RwLock<Option<i64>>,
}

impl AccountState {
    pub fn new(
        network_id: &str,
        store: Arc<dyn LockStore>,
        lock_ttl: Duration,
        lock_wait: Duration,
    ) -> Self {
        Self {
            network_id: network_id.to_string(),
            names: LockNames::for_network(network_id),
            store,
            lock_ttl,
            lock_wait,
            account_number: RwLock::new(None),
        }
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn lock_names(&self) -> &LockNames {
        &self.names
    }

    async fn acquire(&self, name: &str) -> FaucetResult<LockHandle> {
        Ok(self.store.acquire(name, self.lock_ttl, self.lock_wait).await?)
    }

    /// Release a lock, logging instead of failing. A handle that is no longer
    /// held means its TTL lapsed while we worked.
    async fn release(&self, handle: LockHandle) {
        let name = handle.name.clone();
        if let Err(e) = self.store.release(handle).await {
            warn!(lock = %name, "failed to release lock: {}", e);
        }
    }

    /// Take the sequence lock and read the next sequence to use.
    ///
    /// A stored value that does not parse marks the account broken, so the
    /// next claim repairs it from the ledger.
    pub async fn lock_sequence(&self) -> FaucetResult<SequenceSlot> {
        let handle = self.acquire(&self.names.sequence).await?;
        match parse_stored(&self.names.sequence, handle.value.as_deref()) {
            Ok(sequence) => {
                debug!(network = %self.network_id, sequence, "sequence lock acquired");
                Ok(SequenceSlot { handle, sequence })
            }
            Err(e) => {
                self.release(handle).await;
                self.mark_broken_logged(&e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Store `sequence + 1` and release the sequence lock.
    pub async fn commit_sequence(&self, slot: SequenceSlot) -> FaucetResult<()> {
        let next = slot.sequence + 1;
        let written = self
            .store
            .set_value(&slot.handle, &next.to_string())
            .await;
        self.release(slot.handle).await;
        written?;
        debug!(network = %self.network_id, sequence = next, "sequence advanced");
        Ok(())
    }

    /// Release the sequence lock leaving the stored sequence unchanged.
    pub async fn release_sequence(&self, slot: SequenceSlot) {
        self.release(slot.handle).await;
    }

    /// Read the broken flag under its lock.
    pub async fn broken_flag(&self) -> FaucetResult<BrokenFlag> {
        let handle = self.acquire(&self.names.broken_flag).await?;
        let flag = BrokenFlag::decode(handle.value.as_deref());
        self.release(handle).await;
        Ok(flag)
    }

    pub async fn is_broken(&self) -> FaucetResult<bool> {
        Ok(self.broken_flag().await?.is_broken())
    }

    /// Flag the account for repair with `reason`. Callers holding the sequence
    /// lock may call this; nothing else may be held.
    pub async fn mark_broken(&self, reason: &str) -> FaucetResult<()> {
        self.write_flag(&BrokenFlag::Broken(reason.to_string())).await?;
        warn!(network = %self.network_id, reason, "account marked broken");
        Ok(())
    }

    /// Like [`mark_broken`](Self::mark_broken) but only logs a failure.
    pub async fn mark_broken_logged(&self, reason: &str) {
        if let Err(e) = self.mark_broken(reason).await {
            error!(network = %self.network_id, "failed to mark account broken ({}): {}", reason, e);
        }
    }

    pub async fn clear_broken(&self) -> FaucetResult<()> {
        self.write_flag(&BrokenFlag::Healthy).await
    }

    async fn write_flag(&self, flag: &BrokenFlag) -> FaucetResult<()> {
        let handle = self.acquire(&self.names.broken_flag).await?;
        let written = self.store.set_value(&handle, flag.encode()).await;
        self.release(handle).await;
        Ok(written?)
    }

    /// Account number cached by this process, if any.
    pub fn account_number(&self) -> Option<i64> {
        *self
            .account_number
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_account_number(&self, account_number: i64) {
        *self
            .account_number
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(account_number);
    }

    /// Read the stored account number under its lock and refresh the cache.
    pub async fn refresh_account_number(&self) -> FaucetResult<i64> {
        let handle = self.acquire(&self.names.account_number).await?;
        let parsed = parse_stored(&self.names.account_number, handle.value.as_deref());
        self.release(handle).await;
        let account_number = parsed?;
        self.cache_account_number(account_number);
        Ok(account_number)
    }

    /// Overwrite the stored values with `snapshot` and clear the broken flag.
    ///
    /// Takes the sequence lock, then the broken flag lock. Returns `false`
    /// without writing if another process repaired the account first.
    pub async fn republish(&self, snapshot: AccountSnapshot) -> FaucetResult<bool> {
        let sequence = self.acquire(&self.names.sequence).await?;
        let outcome = self.republish_holding(&sequence, snapshot).await;
        self.release(sequence).await;
        outcome
    }

    async fn republish_holding(
        &self,
        sequence: &LockHandle,
        snapshot: AccountSnapshot,
    ) -> FaucetResult<bool> {
        let flag = self.acquire(&self.names.broken_flag).await?;
        let outcome = self.republish_flagged(sequence, &flag, snapshot).await;
        self.release(flag).await;
        outcome
    }

    async fn republish_flagged(
        &self,
        sequence: &LockHandle,
        flag: &LockHandle,
        snapshot: AccountSnapshot,
    ) -> FaucetResult<bool> {
        if !BrokenFlag::decode(flag.value.as_deref()).is_broken() {
            return Ok(false);
        }

        self.store
            .set_value(sequence, &snapshot.sequence.to_string())
            .await?;

        let account = self.acquire(&self.names.account_number).await?;
        let written = self
            .store
            .set_value(&account, &snapshot.account_number.to_string())
            .await;
        self.release(account).await;
        written?;

        // Cleared last: a failure above leaves the account flagged.
        self.store.set_value(flag, HEALTHY_MARKER).await?;
        self.cache_account_number(snapshot.account_number);
        Ok(true)
    }
}

fn parse_stored(name: &str, value: Option<&str>) -> FaucetResult<i64> {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| FaucetError::CorruptState {
            name: name.to_string(),
            value: value.map(String::from),
        })
}
