//! Recovery resolver: brings a broken account state back in line with the ledger

use crate::account::{AccountState, BrokenFlag};
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::LedgerClient;
use crate::metrics::FaucetMetrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct RecoveryResolver {
    state: Arc<AccountState>,
    ledger: Arc<dyn LedgerClient>,
    account_address: String,
    metrics: Arc<FaucetMetrics>,
}

impl RecoveryResolver {
    pub fn new(
        state: Arc<AccountState>,
        ledger: Arc<dyn LedgerClient>,
        account_address: &str,
        metrics: Arc<FaucetMetrics>,
    ) -> Self {
        Self {
            state,
            ledger,
            account_address: account_address.to_string(),
            metrics,
        }
    }

    /// Repair the stored account state if it is flagged broken.
    ///
    /// The node is queried while no lock is held. The stored values are then
    /// overwritten under the sequence and broken flag locks, unless another
    /// process repaired the account in the meantime. If the node cannot be
    /// reached the flag stays set and the next call tries again.
    pub async fn repair(&self) -> FaucetResult<()> {
        let reason = match self.state.broken_flag().await? {
            BrokenFlag::Healthy => {
                self.metrics.set_broken(false);
                return Ok(());
            }
            BrokenFlag::Broken(reason) => reason,
        };
        self.metrics.set_broken(true);
        warn!(
            network = %self.state.network_id(),
            reason = %reason,
            "account state flagged broken, reloading it from the node"
        );

        let snapshot = match self.ledger.account(&self.account_address).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("failed to query account {}: {}", self.account_address, e);
                self.metrics.record_repair("failed");
                return Err(FaucetError::RepairFailed(e));
            }
        };

        if self.state.republish(snapshot).await? {
            info!(
                network = %self.state.network_id(),
                sequence = snapshot.sequence,
                account_number = snapshot.account_number,
                "account state repaired"
            );
            self.metrics.record_repair("repaired");
        } else {
            debug!("account state already repaired elsewhere");
            self.metrics.record_repair("skipped");
        }
        self.metrics.set_broken(false);
        Ok(())
    }
}
