//! Transfer transactions: coin amounts, the envelope and its signer

use crate::error::{FaucetError, FaucetResult};
use k256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// An amount of one denomination. The amount is kept as a decimal string the
/// way the ledger encodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(amount: u128, denom: &str) -> Self {
        Self {
            denom: denom.to_string(),
            amount: amount.to_string(),
        }
    }
}

/// Parse a coin list such as `10steak,5mycoin`. Empty input is an empty list.
/// The result is sorted by denomination.
pub fn parse_coins(input: &str) -> FaucetResult<Vec<Coin>> {
    let mut coins = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let split = part
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| FaucetError::Config(format!("coin {:?} has no denomination", part)))?;
        let (amount, denom) = part.split_at(split);

        let amount: u128 = amount
            .parse()
            .map_err(|_| FaucetError::Config(format!("coin {:?} has no amount", part)))?;
        if amount == 0 {
            return Err(FaucetError::Config(format!("coin {:?} has a zero amount", part)));
        }
        if !valid_denom(denom) {
            return Err(FaucetError::Config(format!("invalid denomination {:?}", denom)));
        }
        if coins.iter().any(|c: &Coin| c.denom == denom) {
            return Err(FaucetError::Config(format!("duplicate denomination {:?}", denom)));
        }
        coins.push(Coin::new(amount, denom));
    }
    coins.sort_by(|a, b| a.denom.cmp(&b.denom));
    Ok(coins)
}

fn valid_denom(denom: &str) -> bool {
    let mut chars = denom.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && (3..=16).contains(&denom.len())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// A single transfer from the faucet account, signed or not yet signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub chain_id: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Vec<Coin>,
    pub sequence: i64,
    pub account_number: i64,
    pub fee: Vec<Coin>,
    pub gas: u64,
    pub memo: String,
    pub signature: Option<Vec<u8>>,
}

impl TransactionEnvelope {
    fn message(&self) -> Value {
        json!({
            "type": "cosmos-sdk/MsgSend",
            "value": {
                "from_address": self.from_address,
                "to_address": self.to_address,
                "amount": self.amount,
            }
        })
    }

    fn fee(&self) -> Value {
        json!({
            "amount": self.fee,
            "gas": self.gas.to_string(),
        })
    }

    /// Canonical bytes covered by the signature: compact JSON with sorted keys.
    pub fn sign_bytes(&self) -> FaucetResult<Vec<u8>> {
        let doc = json!({
            "account_number": self.account_number.to_string(),
            "chain_id": self.chain_id,
            "fee": self.fee(),
            "memo": self.memo,
            "msgs": [self.message()],
            "sequence": self.sequence.to_string(),
        });
        serde_json::to_vec(&doc).map_err(|e| FaucetError::Encoding(e.to_string()))
    }
}

/// Signs envelopes for the faucet account and encodes them for broadcast.
pub trait TxSigner: Send + Sync {
    /// Attach a signature to `envelope`.
    fn sign(&self, envelope: &mut TransactionEnvelope) -> FaucetResult<()>;

    /// Wire bytes of a signed envelope.
    fn encode(&self, envelope: &TransactionEnvelope) -> FaucetResult<Vec<u8>>;
}

/// secp256k1 signer over the canonical sign bytes
pub struct Secp256k1Signer {
    signing_key: SigningKey,
}

impl Secp256k1Signer {
    /// Build from a 32-byte key in hex, with or without a `0x` prefix.
    pub fn from_hex(private_key: &str) -> FaucetResult<Self> {
        let trimmed = private_key.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(trimmed)
            .map_err(|e| FaucetError::Signing(format!("private key is not hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(FaucetError::Signing(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| FaucetError::Signing(format!("invalid private key: {}", e)))?;
        Ok(Self { signing_key })
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_encoded_point(true).as_bytes())
    }
}

impl TxSigner for Secp256k1Signer {
    fn sign(&self, envelope: &mut TransactionEnvelope) -> FaucetResult<()> {
        let message = envelope.sign_bytes()?;
        let signature: Signature = self
            .signing_key
            .try_sign(&message)
            .map_err(|e| FaucetError::Signing(e.to_string()))?;
        envelope.signature = Some(signature.to_bytes().to_vec());
        Ok(())
    }

    fn encode(&self, envelope: &TransactionEnvelope) -> FaucetResult<Vec<u8>> {
        let signature = envelope
            .signature
            .as_ref()
            .ok_or_else(|| FaucetError::Encoding("envelope is not signed".into()))?;

        let tx = json!({
            "type": "auth/StdTx",
            "value": {
                "msg": [envelope.message()],
                "fee": envelope.fee(),
                "signatures": [{
                    "pub_key": {
                        "type": "tendermint/PubKeySecp256k1",
                        "value": self.public_key_hex(),
                    },
                    "signature": hex::encode(signature),
                    "account_number": envelope.account_number.to_string(),
                    "sequence": envelope.sequence.to_string(),
                }],
                "memo": envelope.memo,
            }
        });
        serde_json::to_vec(&tx).map_err(|e| FaucetError::Encoding(e.to_string()))
    }
}
