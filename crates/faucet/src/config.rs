//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use drip_common::LoggingConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `FAUCET_NODE_URL`.
pub const ENV_PREFIX: &str = "FAUCET";

/// Faucet service configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Address the HTTP server binds to
    pub server_addr: String,

    /// Tendermint RPC endpoint of the ledger node
    pub node_url: String,

    /// Light-client REST endpoint used for account queries
    pub lcd_url: String,

    /// Network id; queried from the node when unset
    pub chain_id: Option<String>,

    /// Faucet account address (bech32)
    pub account_address: String,

    /// Faucet account private key, 32 hex-encoded bytes
    pub private_key: String,

    /// Coins sent per claim, e.g. `10steak`
    pub amount: String,

    /// Fee attached to each transaction; empty for none
    pub fee: String,

    /// Gas limit for each transaction
    pub gas: u64,

    /// Memo attached to each transaction
    pub memo: String,

    /// Required human-readable prefix of claimed addresses
    pub address_prefix: Option<String>,

    /// How long a broadcast may run before the account is marked broken
    pub timeout_secs: u64,

    /// CORS origins; empty or `*` allows any origin
    #[serde(deserialize_with = "string_or_list")]
    pub allowed_origins: Vec<String>,

    /// reCAPTCHA secret
    pub captcha_secret: Option<String>,

    /// reCAPTCHA verification endpoint
    pub captcha_verify_url: String,

    /// Lock store backend
    pub lock_store: LockStoreConfig,

    /// Lifetime of a held lock; must exceed `timeout_secs + 2 * lock_wait_secs`
    pub lock_ttl_secs: u64,

    /// How long to wait for a busy lock
    pub lock_wait_secs: u64,

    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`. Only enable
    /// behind a reverse proxy that sets them.
    pub trust_forwarded_headers: bool,

    /// Claims allowed per client IP per minute
    pub rate_limit_per_minute: u32,

    /// Claims a client IP may make back to back
    pub rate_limit_burst: u32,

    /// Cancel the broadcast task when it times out instead of letting it finish
    pub abort_broadcast_on_timeout: bool,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Skip the per-IP rate limiter
    pub disable_limiter: bool,

    /// Accept claims without broadcasting anything
    pub disable_send: bool,

    /// Skip captcha verification
    pub disable_captcha: bool,
}

/// Where the coordination locks live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LockStoreConfig {
    /// Inside this process; only safe with a single faucet instance
    Memory,
    /// Embedded sled database; instances on one host may share it
    Sled { path: PathBuf },
    /// A `lockd` server shared by any number of instances
    Remote { url: String },
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            node_url: "http://localhost:26657".to_string(),
            lcd_url: "http://localhost:1317".to_string(),
            chain_id: None,
            account_address: String::new(),
            private_key: String::new(),
            amount: "10steak".to_string(),
            fee: String::new(),
            gas: 200_000,
            memo: "faucet drop".to_string(),
            address_prefix: None,
            timeout_secs: 90,
            allowed_origins: Vec::new(),
            captcha_secret: None,
            captcha_verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            lock_store: LockStoreConfig::Memory,
            lock_ttl_secs: 180,
            lock_wait_secs: 30,
            trust_forwarded_headers: false,
            rate_limit_per_minute: 10,
            rate_limit_burst: 1,
            abort_broadcast_on_timeout: false,
            logging: LoggingConfig::default(),
            disable_limiter: false,
            disable_send: false,
            disable_captcha: false,
        }
    }
}

impl FaucetConfig {
    /// Load defaults, then `path` if given, then `FAUCET_*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        drip_common::load_config(path, ENV_PREFIX)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    /// Check the settings the enabled features depend on.
    pub fn validate(&self) -> FaucetResult<()> {
        if self.timeout_secs == 0 {
            return Err(FaucetError::Config("timeout_secs must be positive".into()));
        }
        if !self.disable_send {
            if self.account_address.is_empty() {
                return Err(FaucetError::Config(
                    "account_address is required when sending is enabled".into(),
                ));
            }
            if self.private_key.is_empty() {
                return Err(FaucetError::Config(
                    "private_key is required when sending is enabled".into(),
                ));
            }
            // The sequence lock is held across an account number read, the
            // broadcast race and a broken flag write. Each lock wait may run
            // its full length.
            let hold = self
                .timeout_secs
                .saturating_add(self.lock_wait_secs.saturating_mul(2));
            if self.lock_ttl_secs <= hold {
                return Err(FaucetError::Config(format!(
                    "lock_ttl_secs ({}) must exceed timeout_secs + 2 * lock_wait_secs ({})",
                    self.lock_ttl_secs, hold
                )));
            }
        }
        if !self.disable_captcha && self.captcha_secret.as_deref().map_or(true, str::is_empty) {
            return Err(FaucetError::Config(
                "captcha_secret is required unless captcha is disabled".into(),
            ));
        }
        if !self.disable_limiter && (self.rate_limit_per_minute == 0 || self.rate_limit_burst == 0) {
            return Err(FaucetError::Config(
                "rate_limit_per_minute and rate_limit_burst must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether CORS should let any origin through.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl std::fmt::Debug for FaucetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaucetConfig")
            .field("server_addr", &self.server_addr)
            .field("node_url", &self.node_url)
            .field("lcd_url", &self.lcd_url)
            .field("chain_id", &self.chain_id)
            .field("account_address", &self.account_address)
            .field("private_key", &redact(&self.private_key))
            .field("amount", &self.amount)
            .field("fee", &self.fee)
            .field("gas", &self.gas)
            .field("memo", &self.memo)
            .field("address_prefix", &self.address_prefix)
            .field("timeout_secs", &self.timeout_secs)
            .field("allowed_origins", &self.allowed_origins)
            .field("captcha_secret", &self.captcha_secret.as_deref().map(redact))
            .field("captcha_verify_url", &self.captcha_verify_url)
            .field("lock_store", &self.lock_store)
            .field("lock_ttl_secs", &self.lock_ttl_secs)
            .field("lock_wait_secs", &self.lock_wait_secs)
            .field("trust_forwarded_headers", &self.trust_forwarded_headers)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("abort_broadcast_on_timeout", &self.abort_broadcast_on_timeout)
            .field("logging", &self.logging)
            .field("disable_limiter", &self.disable_limiter)
            .field("disable_send", &self.disable_send)
            .field("disable_captcha", &self.disable_captcha)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

/// Accept either a list or one comma-separated string, so the origins can be
/// set from a single environment variable.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Origins {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Origins::deserialize(deserializer)? {
        Origins::List(list) => list,
        Origins::Csv(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect(),
    })
}
