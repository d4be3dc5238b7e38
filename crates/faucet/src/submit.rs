//! Transaction submitter: one transfer per call, serialized on the sequence lock

use crate::account::{AccountState, SequenceSlot};
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{BroadcastReceipt, LedgerClient};
use crate::metrics::FaucetMetrics;
use crate::repair::RecoveryResolver;
use crate::tx::{Coin, TransactionEnvelope, TxSigner};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Fixed parts of every transfer
#[derive(Debug, Clone)]
pub struct TransferTemplate {
    pub chain_id: String,
    pub from_address: String,
    pub amount: Vec<Coin>,
    pub fee: Vec<Coin>,
    pub gas: u64,
    pub memo: String,
}

impl TransferTemplate {
    fn envelope(&self, to_address: &str, sequence: i64, account_number: i64) -> TransactionEnvelope {
        TransactionEnvelope {
            chain_id: self.chain_id.clone(),
            from_address: self.from_address.clone(),
            to_address: to_address.to_string(),
            amount: self.amount.clone(),
            sequence,
            account_number,
            fee: self.fee.clone(),
            gas: self.gas,
            memo: self.memo.clone(),
            signature: None,
        }
    }
}

pub struct TransactionSubmitter {
    state: Arc<AccountState>,
    resolver: RecoveryResolver,
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<dyn TxSigner>,
    template: TransferTemplate,
    timeout: Duration,
    abort_on_timeout: bool,
    metrics: Arc<FaucetMetrics>,
}

impl TransactionSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<AccountState>,
        resolver: RecoveryResolver,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn TxSigner>,
        template: TransferTemplate,
        timeout: Duration,
        abort_on_timeout: bool,
        metrics: Arc<FaucetMetrics>,
    ) -> Self {
        Self {
            state,
            resolver,
            ledger,
            signer,
            template,
            timeout,
            abort_on_timeout,
            metrics,
        }
    }

    pub fn account_state(&self) -> &Arc<AccountState> {
        &self.state
    }

    /// Send the configured amount to `recipient`.
    ///
    /// Repairs the account first if needed, then holds the sequence lock from
    /// reading the sequence until the broadcast resolves or times out. The
    /// stored sequence only advances on a committed transaction. A timeout, or
    /// a broadcast failure that may still have landed, marks the account broken.
    ///
    /// The work runs on its own task. Dropping the returned future does not
    /// stop it, so a held sequence lock is always committed or released.
    pub async fn submit(self: &Arc<Self>, recipient: &str) -> FaucetResult<BroadcastReceipt> {
        let submitter = Arc::clone(self);
        let recipient = recipient.to_string();
        tokio::spawn(async move { submitter.submit_detached(&recipient).await })
            .await
            .map_err(|e| FaucetError::Internal(format!("submit task failed: {}", e)))?
    }

    async fn submit_detached(&self, recipient: &str) -> FaucetResult<BroadcastReceipt> {
        self.resolver.repair().await?;

        let slot = self.state.lock_sequence().await?;
        let tx = match self.build(recipient, &slot).await {
            Ok(tx) => tx,
            Err(e) => {
                self.state.release_sequence(slot).await;
                return Err(e);
            }
        };

        let sequence = slot.sequence();
        info!(sequence, to = recipient, "broadcasting transfer");

        let ledger = self.ledger.clone();
        let mut broadcast = tokio::spawn(async move { ledger.broadcast(tx).await });
        let started = Instant::now();

        tokio::select! {
            joined = &mut broadcast => {
                self.metrics.observe_broadcast(started.elapsed());
                match joined {
                    Ok(Ok(receipt)) => {
                        info!(sequence, hash = %receipt.hash, height = receipt.height, "transfer committed");
                        if let Err(e) = self.state.commit_sequence(slot).await {
                            error!(sequence, "transaction {} committed but the sequence was not advanced: {}", receipt.hash, e);
                            self.flag_broken("sequence not advanced after commit").await;
                        }
                        Ok(receipt)
                    }
                    Ok(Err(e)) => {
                        if e.outcome_unknown() {
                            warn!(sequence, "broadcast outcome unknown: {}", e);
                            self.flag_broken(&format!("broadcast outcome unknown: {}", e)).await;
                        } else {
                            warn!(sequence, "broadcast refused: {}", e);
                        }
                        self.state.release_sequence(slot).await;
                        Err(e.into())
                    }
                    Err(e) => {
                        error!(sequence, "broadcast task failed: {}", e);
                        self.flag_broken("broadcast task failed").await;
                        self.state.release_sequence(slot).await;
                        Err(FaucetError::Internal(format!("broadcast task failed: {}", e)))
                    }
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(sequence, "broadcast still pending after {:?}", self.timeout);
                self.flag_broken("broadcast timed out").await;
                self.state.release_sequence(slot).await;
                if self.abort_on_timeout {
                    broadcast.abort();
                }
                Err(FaucetError::Timeout(self.timeout))
            }
        }
    }

    /// Raise the broken flag, logging a failure to do so. The sequence lock
    /// may be held.
    pub async fn flag_broken(&self, reason: &str) {
        self.state.mark_broken_logged(reason).await;
        self.metrics.set_broken(true);
    }

    /// Sign and encode the transfer. The account number is read from the store
    /// under its own lock, so a repair made by another process is picked up.
    async fn build(&self, recipient: &str, slot: &SequenceSlot) -> FaucetResult<Vec<u8>> {
        let account_number = self.state.refresh_account_number().await?;
        let mut envelope = self
            .template
            .envelope(recipient, slot.sequence(), account_number);
        self.signer.sign(&mut envelope)?;
        self.signer.encode(&envelope)
    }
}
