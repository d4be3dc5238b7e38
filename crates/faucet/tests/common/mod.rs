#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use drip_faucet::captcha::CaptchaVerifier;
use drip_faucet::{
    AccountSnapshot, BroadcastReceipt, FaucetConfig, FaucetResult, FaucetService, LedgerClient,
    LedgerError, Secp256k1Signer, ServiceParts,
};
use drip_lockstore::MemoryLockStore;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const FAUCET_ADDRESS: &str = "cosmosaccaddr1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5cysd9p";
pub const RECIPIENT: &str = "cosmosaccaddr1kje2wjc66mc3u283dy80czej8m9su8ca5a8drz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    Commit,
    Reject,
    Hang,
    ConnectionReset,
    Refused,
}

/// Scriptable ledger that records the sequence of every broadcast it sees.
pub struct FakeLedger {
    pub behavior: Mutex<Broadcast>,
    pub snapshot: Mutex<Option<AccountSnapshot>>,
    pub delay: Duration,
    pub broadcast_sequences: Mutex<Vec<i64>>,
    pub broadcast_account_numbers: Mutex<Vec<i64>>,
    pub account_queries: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeLedger {
    pub fn new(behavior: Broadcast) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            snapshot: Mutex::new(None),
            delay: Duration::from_millis(5),
            broadcast_sequences: Mutex::new(Vec::new()),
            broadcast_account_numbers: Mutex::new(Vec::new()),
            account_queries: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_snapshot(self, sequence: i64, account_number: i64) -> Self {
        *self.snapshot.lock().unwrap() = Some(AccountSnapshot {
            sequence,
            account_number,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: Broadcast) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn sequences(&self) -> Vec<i64> {
        self.broadcast_sequences.lock().unwrap().clone()
    }

    pub fn account_numbers(&self) -> Vec<i64> {
        self.broadcast_account_numbers.lock().unwrap().clone()
    }
}

fn signed_field(tx: &[u8], field: &str) -> i64 {
    let tx: serde_json::Value = serde_json::from_slice(tx).unwrap();
    tx["value"]["signatures"][0][field]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn network_id(&self) -> Result<String, LedgerError> {
        Ok("testnet".to_string())
    }

    async fn account(&self, _address: &str) -> Result<AccountSnapshot, LedgerError> {
        self.account_queries.fetch_add(1, Ordering::SeqCst);
        let snapshot = *self.snapshot.lock().unwrap();
        snapshot.ok_or_else(|| LedgerError::Unreachable("connection refused".into()))
    }

    async fn broadcast(&self, tx: Vec<u8>) -> Result<BroadcastReceipt, LedgerError> {
        let sequence = signed_field(&tx, "sequence");
        self.broadcast_sequences.lock().unwrap().push(sequence);
        self.broadcast_account_numbers
            .lock()
            .unwrap()
            .push(signed_field(&tx, "account_number"));
        let behavior = *self.behavior.lock().unwrap();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            Broadcast::Commit => Ok(BroadcastReceipt {
                height: 100 + sequence,
                hash: format!("{:064X}", sequence),
            }),
            Broadcast::Reject => Err(LedgerError::Rejected {
                code: 4,
                log: "signature verification failed".into(),
            }),
            Broadcast::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(LedgerError::Transport("gave up".into()))
            }
            Broadcast::ConnectionReset => Err(LedgerError::Transport("connection reset".into())),
            Broadcast::Refused => Err(LedgerError::Unreachable("connection refused".into())),
        }
    }
}

/// Captcha verifier with a fixed verdict that remembers who asked.
pub struct RecordingCaptcha {
    pub verdict: bool,
    pub calls: Mutex<Vec<(IpAddr, String)>>,
}

impl RecordingCaptcha {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CaptchaVerifier for RecordingCaptcha {
    async fn verify(&self, remote_ip: IpAddr, response: &str) -> FaucetResult<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((remote_ip, response.to_string()));
        Ok(self.verdict)
    }
}

pub fn test_config() -> FaucetConfig {
    FaucetConfig {
        chain_id: Some("testnet".into()),
        account_address: FAUCET_ADDRESS.into(),
        private_key: "01".repeat(32),
        timeout_secs: 5,
        lock_ttl_secs: 10,
        lock_wait_secs: 2,
        trust_forwarded_headers: true,
        disable_captcha: true,
        disable_limiter: true,
        ..FaucetConfig::default()
    }
}

/// Store holding a healthy account at `sequence` with account number 2.
pub fn healthy_store(sequence: i64) -> Arc<MemoryLockStore> {
    Arc::new(
        MemoryLockStore::new()
            .with_value("testnet-sequence", &sequence.to_string())
            .with_value("testnet-accountnumber", "2")
            .with_value("testnet-brokenflag", "no"),
    )
}

pub async fn build_service(
    config: FaucetConfig,
    ledger: Arc<FakeLedger>,
    store: Arc<MemoryLockStore>,
    captcha: Option<Arc<RecordingCaptcha>>,
) -> Arc<FaucetService> {
    let parts = ServiceParts {
        ledger,
        store,
        signer: Some(Arc::new(Secp256k1Signer::from_hex(&config.private_key).unwrap())),
        captcha: captcha.map(|c| c as Arc<dyn CaptchaVerifier>),
    };
    Arc::new(FaucetService::assemble(config, parts).await.unwrap())
}

pub fn claim_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/claim")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn claim_body(address: &str) -> String {
    serde_json::json!({ "address": address, "response": "token" }).to_string()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}
