//! Ledger node client

use crate::error::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a detached broadcast; the submitter's own timeout is much shorter.
const BROADCAST_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Sequence and account number as the ledger reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(deserialize_with = "int_or_string")]
    pub sequence: i64,
    #[serde(deserialize_with = "int_or_string")]
    pub account_number: i64,
}

/// Where a committed transaction landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastReceipt {
    pub height: i64,
    pub hash: String,
}

/// What the faucet needs from a ledger node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Network id reported by the node.
    async fn network_id(&self) -> Result<String, LedgerError>;

    /// Current sequence and account number of `address`.
    async fn account(&self, address: &str) -> Result<AccountSnapshot, LedgerError>;

    /// Broadcast `tx` and wait until it is committed or refused.
    async fn broadcast(&self, tx: Vec<u8>) -> Result<BroadcastReceipt, LedgerError>;
}

/// Talks to a Tendermint RPC endpoint and the light-client REST server.
pub struct NodeRpcClient {
    node_url: String,
    lcd_url: String,
    client: reqwest::Client,
}

impl NodeRpcClient {
    pub fn new(node_url: &str, lcd_url: &str) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            node_url: node_url.trim_end_matches('/').to_string(),
            lcd_url: lcd_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let request = self
            .client
            .post(&self.node_url)
            .timeout(QUERY_TIMEOUT)
            .json(&payload);
        rpc_result(request).await
    }
}

/// Send a request and unwrap the JSON-RPC envelope of the answer.
async fn rpc_result(request: reqwest::RequestBuilder) -> Result<Value, LedgerError> {
    let response = request.send().await?;
    if !response.status().is_success() && response.status().as_u16() != 500 {
        return Err(LedgerError::Status(response.status().as_u16()));
    }

    let json: Value = response.json().await?;
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = [error.get("message"), error.get("data")]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(": ");
        return Err(LedgerError::Rpc { code, message });
    }

    json.get("result")
        .cloned()
        .ok_or_else(|| LedgerError::InvalidResponse("missing result".into()))
}

#[async_trait]
impl LedgerClient for NodeRpcClient {
    async fn network_id(&self) -> Result<String, LedgerError> {
        let status = self.call("status", serde_json::json!({})).await?;
        status
            .pointer("/node_info/network")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| LedgerError::InvalidResponse("status without node_info.network".into()))
    }

    async fn account(&self, address: &str) -> Result<AccountSnapshot, LedgerError> {
        let url = format!("{}/accounts/{}", self.lcd_url, address);
        let response = self.client.get(&url).timeout(QUERY_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(LedgerError::Status(response.status().as_u16()));
        }

        let body: Value = response.json().await?;
        parse_account(&body)
    }

    async fn broadcast(&self, tx: Vec<u8>) -> Result<BroadcastReceipt, LedgerError> {
        let request = self
            .client
            .get(format!("{}/broadcast_tx_commit", self.node_url))
            .timeout(BROADCAST_REQUEST_TIMEOUT)
            .query(&[("tx", format!("0x{}", hex::encode(&tx)))]);
        let result = rpc_result(request).await?;
        debug!("broadcast result: {}", result);

        for phase in ["check_tx", "deliver_tx"] {
            let code = result
                .pointer(&format!("/{}/code", phase))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if code != 0 {
                let log = result
                    .pointer(&format!("/{}/log", phase))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Err(LedgerError::Rejected {
                    code: code as u32,
                    log,
                });
            }
        }

        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::InvalidResponse("broadcast result without hash".into()))?
            .to_string();
        let height = result
            .get("height")
            .and_then(value_as_i64)
            .ok_or_else(|| LedgerError::InvalidResponse("broadcast result without height".into()))?;
        Ok(BroadcastReceipt { height, hash })
    }
}

/// Accept a bare account object or one wrapped in `result` and/or `value`.
fn parse_account(body: &Value) -> Result<AccountSnapshot, LedgerError> {
    let candidates = [
        Some(body),
        body.get("value"),
        body.get("result"),
        body.pointer("/result/value"),
    ];
    let account = candidates
        .into_iter()
        .flatten()
        .find(|v| v.get("sequence").is_some() && v.get("account_number").is_some())
        .ok_or_else(|| LedgerError::InvalidResponse(format!("no account in {}", body)))?;

    serde_json::from_value(account.clone()).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_i64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_account_shapes() {
        let expected = AccountSnapshot {
            sequence: 7,
            account_number: 3,
        };
        let bare = json!({ "address": "x", "sequence": "7", "account_number": "3" });
        let wrapped = json!({ "type": "auth/Account", "value": { "sequence": 7, "account_number": 3 } });
        let nested = json!({ "height": "0", "result": { "value": { "sequence": "7", "account_number": 3 } } });

        assert_eq!(parse_account(&bare).unwrap(), expected);
        assert_eq!(parse_account(&wrapped).unwrap(), expected);
        assert_eq!(parse_account(&nested).unwrap(), expected);
    }

    #[test]
    fn test_parse_account_rejects_garbage() {
        assert!(parse_account(&json!({ "value": {} })).is_err());
        assert!(parse_account(&json!({ "sequence": "x", "account_number": "1" })).is_err());
    }
}
