//! Testnet token faucet.
//!
//! Every claim sends a fixed amount from one shared account. Any number of
//! faucet instances may serve claims at once: they agree on the account's
//! next sequence through locks in a shared [`LockStore`](drip_lockstore::LockStore).
//! A broadcast that outlives its timeout leaves the stored sequence in doubt,
//! so the account is flagged broken and the next claim reloads it from the
//! ledger before sending.

pub mod account;
pub mod address;
pub mod api;
pub mod captcha;
pub mod claim;
pub mod config;
pub mod error;
pub mod ledger;
pub mod limiter;
pub mod metrics;
pub mod repair;
pub mod service;
pub mod submit;
pub mod tx;

pub use account::{AccountState, BrokenFlag};
pub use claim::{ClaimPipeline, ClaimRequest, ClaimResponse};
pub use config::{FaucetConfig, LockStoreConfig};
pub use error::{FaucetError, FaucetResult, LedgerError};
pub use ledger::{AccountSnapshot, BroadcastReceipt, LedgerClient, NodeRpcClient};
pub use service::{FaucetService, ServiceParts};
pub use submit::TransactionSubmitter;
pub use tx::{Secp256k1Signer, TxSigner};
