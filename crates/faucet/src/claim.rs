//! Claim pipeline: validate, verify, submit

use crate::address::normalize_address;
use crate::captcha::CaptchaVerifier;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::BroadcastReceipt;
use crate::metrics::FaucetMetrics;
use crate::submit::TransactionSubmitter;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Hash reported when sending is disabled.
pub const SEND_DISABLED_HASH: &str = "SendDisabled";

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub address: String,
    /// Captcha response token
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub message: String,
    pub hash: String,
    pub height: i64,
}

impl ClaimResponse {
    fn committed(receipt: BroadcastReceipt) -> Self {
        Self {
            message: "transaction committed".to_string(),
            hash: receipt.hash,
            height: receipt.height,
        }
    }

    fn send_disabled() -> Self {
        Self {
            message: "transaction committed".to_string(),
            hash: SEND_DISABLED_HASH.to_string(),
            height: 0,
        }
    }
}

pub struct ClaimPipeline {
    address_prefix: Option<String>,
    /// `None` when captcha checks are disabled
    captcha: Option<Arc<dyn CaptchaVerifier>>,
    /// `None` when sending is disabled
    submitter: Option<Arc<TransactionSubmitter>>,
    metrics: Arc<FaucetMetrics>,
}

impl ClaimPipeline {
    pub fn new(
        address_prefix: Option<String>,
        captcha: Option<Arc<dyn CaptchaVerifier>>,
        submitter: Option<Arc<TransactionSubmitter>>,
        metrics: Arc<FaucetMetrics>,
    ) -> Self {
        Self {
            address_prefix,
            captcha,
            submitter,
            metrics,
        }
    }

    pub fn submitter(&self) -> Option<&Arc<TransactionSubmitter>> {
        self.submitter.as_ref()
    }

    /// Handle one raw claim body from `client_ip`.
    pub async fn handle_claim(&self, body: &[u8], client_ip: IpAddr) -> FaucetResult<ClaimResponse> {
        let result = self.process(body, client_ip).await;
        let outcome = match &result {
            Ok(response) if response.hash == SEND_DISABLED_HASH => "send_disabled",
            Ok(_) => "committed",
            Err(e) => e.kind(),
        };
        self.metrics.record_claim(outcome);
        result
    }

    async fn process(&self, body: &[u8], client_ip: IpAddr) -> FaucetResult<ClaimResponse> {
        let request: ClaimRequest =
            serde_json::from_slice(body).map_err(|e| FaucetError::InvalidRequest(e.to_string()))?;
        let address = normalize_address(&request.address, self.address_prefix.as_deref())?;

        match &self.captcha {
            Some(verifier) => {
                if !verifier.verify(client_ip, &request.response).await? {
                    return Err(FaucetError::CaptchaRejected);
                }
            }
            None => debug!("captcha disabled, skipping verification"),
        }

        let Some(submitter) = &self.submitter else {
            info!(ip = %client_ip, to = %address, "sending disabled, claim accepted");
            return Ok(ClaimResponse::send_disabled());
        };

        match submitter.submit(&address).await {
            Ok(receipt) => Ok(ClaimResponse::committed(receipt)),
            Err(e) if e.is_timeout() => {
                submitter.flag_broken("claim timed out").await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
