//! Signature decoding and signer recovery
//!
//! The bridge reports `(r, s, v)` loosely typed. They are decoded once here
//! into fixed-width components; everything downstream works on those.

use crate::bridge::messages::{RawRecoveryValue, SignaturePayload};
use crate::core::derivation::{public_key_to_address, to_checksum_address};
use crate::core::errors::{KeyringError, Result};
use ethers::types::{Signature, U256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureComponents {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// y-parity of the nonce point (0 or 1)
    pub recovery_bit: u8,
}

impl SignatureComponents {
    pub fn from_payload(payload: &SignaturePayload) -> Result<Self> {
        let raw_v = match &payload.v {
            RawRecoveryValue::Number(n) => *n,
            RawRecoveryValue::Text(text) => {
                let digits = text.trim().trim_start_matches("0x");
                u64::from_str_radix(digits, 16)
                    .map_err(|_| KeyringError::MalformedResponse(format!("invalid v: {}", text)))?
            }
        };

        Ok(Self {
            r: decode_word(&payload.r, "r")?,
            s: decode_word(&payload.s, "s")?,
            recovery_bit: recovery_bit(raw_v),
        })
    }

    /// `27 + recovery_bit`
    pub fn recovery_value(&self) -> u8 {
        27 + self.recovery_bit
    }

    /// `0x{r}{s}{v}` with `v` as two lowercase hex chars.
    pub fn to_rsv_hex(&self) -> String {
        format!(
            "0x{}{}{:02x}",
            hex::encode(self.r),
            hex::encode(self.s),
            self.recovery_value()
        )
    }

    pub fn to_ethers(&self, v: u64) -> Signature {
        Signature {
            r: U256::from_big_endian(&self.r),
            s: U256::from_big_endian(&self.s),
            v,
        }
    }

    /// Checksummed address of the key that produced this signature over
    /// `digest`.
    pub fn recover_prehash(&self, digest: &[u8; 32]) -> Result<String> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);

        let mut signature = EcdsaSignature::from_slice(&bytes).map_err(|_| KeyringError::InvalidSignature)?;
        let mut bit = self.recovery_bit;
        // high-s signatures recover with the flipped parity once normalized
        if let Some(normalized) = signature.normalize_s() {
            signature = normalized;
            bit ^= 1;
        }

        let recovery_id = RecoveryId::new(bit == 1, false);
        let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map_err(|_| KeyringError::InvalidSignature)?;
        to_checksum_address(&public_key_to_address(&PublicKey::from(&key)))
    }
}

/// Recovery bit from any of the `v` encodings the device produces: the raw
/// bit, `27/28`, EIP-155 values, or EIP-155 values truncated to one byte.
fn recovery_bit(v: u64) -> u8 {
    match v {
        0 | 1 => v as u8,
        _ => ((v % 2) ^ 1) as u8,
    }
}

fn decode_word(value: &str, name: &str) -> Result<[u8; 32]> {
    let digits = value.trim().trim_start_matches("0x");
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&padded)
        .map_err(|e| KeyringError::MalformedResponse(format!("invalid {}: {}", name, e)))?;
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(KeyringError::MalformedResponse(format!(
            "{} must be 1..=32 bytes, got {}",
            name,
            bytes.len()
        )));
    }

    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}
