//! Recipient address checks

use crate::error::{FaucetError, FaucetResult};
use bech32::{FromBase32, ToBase32, Variant};

/// Decode a bech32 address and re-encode it in canonical lowercase form.
///
/// Rejects bad checksums, mixed case, bech32m, empty payloads and, when
/// `required_prefix` is set, any other human-readable part.
pub fn normalize_address(address: &str, required_prefix: Option<&str>) -> FaucetResult<String> {
    let (hrp, data, variant) =
        bech32::decode(address).map_err(|e| FaucetError::InvalidAddress(e.to_string()))?;

    if variant != Variant::Bech32 {
        return Err(FaucetError::InvalidAddress(
            "expected a bech32 checksum, got bech32m".into(),
        ));
    }
    if let Some(prefix) = required_prefix {
        if hrp != prefix {
            return Err(FaucetError::InvalidAddress(format!(
                "expected prefix {}, got {}",
                prefix, hrp
            )));
        }
    }

    let payload =
        Vec::<u8>::from_base32(&data).map_err(|e| FaucetError::InvalidAddress(e.to_string()))?;
    if payload.is_empty() {
        return Err(FaucetError::InvalidAddress("empty address payload".into()));
    }

    bech32::encode(&hrp, payload.to_base32(), Variant::Bech32)
        .map_err(|e| FaucetError::InvalidAddress(e.to_string()))
}
