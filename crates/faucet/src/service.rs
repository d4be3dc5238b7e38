//! Faucet service: builds the collaborators from configuration and wires them together

use crate::account::AccountState;
use crate::address::normalize_address;
use crate::captcha::{CaptchaVerifier, RecaptchaVerifier};
use crate::claim::{ClaimPipeline, ClaimResponse};
use crate::config::{FaucetConfig, LockStoreConfig};
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{BroadcastReceipt, LedgerClient, NodeRpcClient};
use crate::limiter::ClientRateLimiter;
use crate::metrics::FaucetMetrics;
use crate::repair::RecoveryResolver;
use crate::submit::{TransactionSubmitter, TransferTemplate};
use crate::tx::{parse_coins, Secp256k1Signer, TxSigner};
use drip_lockstore::{LockStore, MemoryLockStore, RemoteLockStore, SledLockStore};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators the service is assembled from
pub struct ServiceParts {
    pub ledger: Arc<dyn LedgerClient>,
    pub store: Arc<dyn LockStore>,
    /// Required unless sending is disabled
    pub signer: Option<Arc<dyn TxSigner>>,
    /// Required unless captcha checks are disabled
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
}

impl ServiceParts {
    /// Production collaborators described by `config`.
    pub fn from_config(config: &FaucetConfig) -> FaucetResult<Self> {
        let ledger = NodeRpcClient::new(&config.node_url, &config.lcd_url)?;

        let store: Arc<dyn LockStore> = match &config.lock_store {
            LockStoreConfig::Memory => {
                warn!("using the in-process lock store; run a single faucet instance only");
                Arc::new(MemoryLockStore::new())
            }
            LockStoreConfig::Sled { path } => Arc::new(SledLockStore::open(path)?),
            LockStoreConfig::Remote { url } => Arc::new(RemoteLockStore::new(url)?),
        };

        let signer: Option<Arc<dyn TxSigner>> = if config.disable_send {
            None
        } else {
            Some(Arc::new(Secp256k1Signer::from_hex(&config.private_key)?))
        };

        let captcha: Option<Arc<dyn CaptchaVerifier>> = match &config.captcha_secret {
            Some(secret) if !config.disable_captcha => Some(Arc::new(RecaptchaVerifier::new(
                secret,
                &config.captcha_verify_url,
            ))),
            _ => None,
        };

        Ok(Self {
            ledger: Arc::new(ledger),
            store,
            signer,
            captcha,
        })
    }
}

pub struct FaucetService {
    config: FaucetConfig,
    network_id: String,
    pipeline: ClaimPipeline,
    limiter: Option<ClientRateLimiter>,
    metrics: Arc<FaucetMetrics>,
}

impl FaucetService {
    /// Build the production service described by `config`.
    pub async fn initialize(config: FaucetConfig) -> FaucetResult<Self> {
        config.validate()?;
        let parts = ServiceParts::from_config(&config)?;
        Self::assemble(config, parts).await
    }

    /// Wire the service from `parts`.
    ///
    /// Resolves the network id, then, when sending is enabled, repairs the
    /// stored account state if needed and loads the account number.
    pub async fn assemble(config: FaucetConfig, parts: ServiceParts) -> FaucetResult<Self> {
        let network_id = match &config.chain_id {
            Some(chain_id) => chain_id.clone(),
            None => parts.ledger.network_id().await?,
        };
        info!(network = %network_id, "faucet network");

        let metrics = Arc::new(
            FaucetMetrics::new()
                .map_err(|e| FaucetError::Internal(format!("failed to register metrics: {}", e)))?,
        );

        let submitter = if config.disable_send {
            info!("sending disabled");
            None
        } else {
            let signer = parts
                .signer
                .ok_or_else(|| FaucetError::Config("no signer configured".into()))?;
            Some(Arc::new(
                Self::submitter(&config, &network_id, parts.ledger, parts.store, signer, &metrics)
                    .await?,
            ))
        };

        let captcha = if config.disable_captcha {
            info!("captcha verification disabled");
            None
        } else {
            Some(
                parts
                    .captcha
                    .ok_or_else(|| FaucetError::Config("no captcha verifier configured".into()))?,
            )
        };

        let limiter = if config.disable_limiter {
            info!("rate limiter disabled");
            None
        } else {
            Some(ClientRateLimiter::new(
                config.rate_limit_per_minute,
                config.rate_limit_burst,
            )?)
        };

        let pipeline = ClaimPipeline::new(
            config.address_prefix.clone(),
            captcha,
            submitter,
            metrics.clone(),
        );

        Ok(Self {
            config,
            network_id,
            pipeline,
            limiter,
            metrics,
        })
    }

    async fn submitter(
        config: &FaucetConfig,
        network_id: &str,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn LockStore>,
        signer: Arc<dyn TxSigner>,
        metrics: &Arc<FaucetMetrics>,
    ) -> FaucetResult<TransactionSubmitter> {
        let template = TransferTemplate {
            chain_id: network_id.to_string(),
            from_address: normalize_address(&config.account_address, None)
                .map_err(|e| FaucetError::Config(format!("account_address: {}", e)))?,
            amount: parse_coins(&config.amount)?,
            fee: parse_coins(&config.fee)?,
            gas: config.gas,
            memo: config.memo.clone(),
        };
        if template.amount.is_empty() {
            return Err(FaucetError::Config("amount must name at least one coin".into()));
        }

        let state = Arc::new(AccountState::new(
            network_id,
            store,
            config.lock_ttl(),
            config.lock_wait(),
        ));
        let resolver = RecoveryResolver::new(
            state.clone(),
            ledger.clone(),
            &template.from_address,
            metrics.clone(),
        );

        resolver.repair().await?;
        let account_number = state.refresh_account_number().await?;
        info!(account = %template.from_address, account_number, "faucet account loaded");

        Ok(TransactionSubmitter::new(
            state,
            resolver,
            ledger,
            signer,
            template,
            config.timeout(),
            config.abort_broadcast_on_timeout,
            metrics.clone(),
        ))
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn metrics(&self) -> &Arc<FaucetMetrics> {
        &self.metrics
    }

    pub fn account_state(&self) -> Option<&Arc<AccountState>> {
        self.pipeline.submitter().map(|s| s.account_state())
    }

    pub fn is_rate_limited(&self) -> bool {
        self.limiter.is_some()
    }

    pub async fn check_rate_limit(&self, ip: IpAddr) -> FaucetResult<()> {
        match &self.limiter {
            Some(limiter) => limiter.check(ip).await,
            None => Ok(()),
        }
    }

    pub async fn claim(&self, body: &[u8], client_ip: IpAddr) -> FaucetResult<ClaimResponse> {
        self.pipeline.handle_claim(body, client_ip).await
    }

    /// Send to `address` directly, without captcha or rate limiting.
    pub async fn send_once(&self, address: &str) -> FaucetResult<BroadcastReceipt> {
        let submitter = self
            .pipeline
            .submitter()
            .ok_or_else(|| FaucetError::Config("sending is disabled".into()))?;
        let address = normalize_address(address, self.config.address_prefix.as_deref())?;
        submitter.submit(&address).await
    }
}
