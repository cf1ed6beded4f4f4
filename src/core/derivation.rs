//! BIP32 address derivation
//!
//! The legacy account layout never asks the device for individual accounts:
//! the root public key and chain code returned by one unlock are enough to
//! derive every non-hardened child locally.
//!
//! `ExtendedPrivateKey` exists for the simulated device only; production code
//! never holds private keys.

use crate::core::errors::{KeyringError, Result};
use crate::core::paths::Bip32Path;
use ethers::types::Address;
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, FieldBytes, ProjectivePoint, PublicKey, Scalar, SecretKey};
use sha2::Sha512;
use sha3::{Digest, Keccak256};
use std::str::FromStr;
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// Root key material returned by a committing unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKeyMaterial {
    pub public_key: Vec<u8>,
    pub chain_code: Vec<u8>,
}

impl MasterKeyMaterial {
    /// Decodes the hex strings carried in an unlock payload.
    pub fn from_hex(public_key: &str, chain_code: &str) -> Result<Self> {
        let public_key = hex::decode(public_key.trim_start_matches("0x"))?;
        let chain_code = hex::decode(chain_code.trim_start_matches("0x"))?;
        Ok(Self { public_key, chain_code })
    }

    pub fn to_extended(&self) -> Result<ExtendedPublicKey> {
        ExtendedPublicKey::new(&self.public_key, &self.chain_code)
    }
}

/// Extended public key (public key + chain code)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    public_key: PublicKey,
    chain_code: [u8; 32],
}

impl ExtendedPublicKey {
    /// Accepts compressed (33 bytes) or uncompressed (65 bytes) SEC1 keys.
    pub fn new(public_key: &[u8], chain_code: &[u8]) -> Result<Self> {
        let public_key = PublicKey::from_sec1_bytes(public_key)
            .map_err(|e| KeyringError::KeyDerivation(format!("invalid public key: {}", e)))?;
        let chain_code: [u8; 32] = chain_code
            .try_into()
            .map_err(|_| KeyringError::KeyDerivation(format!("chain code must be 32 bytes, got {}", chain_code.len())))?;
        Ok(Self { public_key, chain_code })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// CKDpub. Hardened indices need the private key and are rejected.
    pub fn derive_child(&self, index: u32) -> Result<Self> {
        if Bip32Path::is_hardened(index) {
            return Err(KeyringError::KeyDerivation(format!(
                "hardened index {} cannot be derived from a public key",
                index
            )));
        }

        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|e| KeyringError::KeyDerivation(format!("HMAC initialization failed: {}", e)))?;
        mac.update(self.public_key.to_encoded_point(true).as_bytes());
        mac.update(&index.to_be_bytes());
        let result = mac.finalize().into_bytes();
        let (il, ir) = result.split_at(32);

        let tweak = parse_scalar(il)?;
        let point = ProjectivePoint::GENERATOR * tweak + self.public_key.to_projective();
        let public_key = PublicKey::from_affine(AffinePoint::from(point))
            .map_err(|_| KeyringError::KeyDerivation(format!("index {} yields the point at infinity", index)))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(Self { public_key, chain_code })
    }

    /// Derives along a relative path such as `m/0/5`.
    pub fn derive_path(&self, path: &str) -> Result<Self> {
        let path = Bip32Path::parse(path)?;
        let mut current = self.clone();
        for index in path.path {
            current = current.derive_child(index)?;
        }
        Ok(current)
    }

    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }
}

/// Extended private key, used by the simulated device.
#[derive(Clone)]
pub struct ExtendedPrivateKey {
    secret: Zeroizing<[u8; 32]>,
    chain_code: [u8; 32],
}

impl ExtendedPrivateKey {
    /// Master key from a BIP39 seed: HMAC-SHA512("Bitcoin seed", seed).
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() < 16 {
            return Err(KeyringError::KeyDerivation("seed length must be at least 16 bytes".to_string()));
        }

        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .map_err(|e| KeyringError::KeyDerivation(format!("HMAC initialization failed: {}", e)))?;
        mac.update(seed);
        let result = mac.finalize().into_bytes();

        let key = parse_scalar(&result[..32])?;
        if key == Scalar::ZERO {
            return Err(KeyringError::KeyDerivation("seed yields an invalid master key".to_string()));
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(&result[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&result[32..]);

        Ok(Self { secret, chain_code })
    }

    /// CKDpriv, hardened or normal.
    pub fn derive_child(&self, index: u32) -> Result<Self> {
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|e| KeyringError::KeyDerivation(format!("HMAC initialization failed: {}", e)))?;
        if Bip32Path::is_hardened(index) {
            mac.update(&[0u8]);
            mac.update(self.secret.as_ref());
        } else {
            mac.update(self.public_key()?.to_encoded_point(true).as_bytes());
        }
        mac.update(&index.to_be_bytes());
        let result = mac.finalize().into_bytes();
        let (il, ir) = result.split_at(32);

        let child = parse_scalar(il)? + parse_scalar(self.secret.as_ref())?;
        if child == Scalar::ZERO {
            return Err(KeyringError::KeyDerivation(format!("index {} yields a zero key", index)));
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(child.to_repr().as_slice());
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(Self { secret, chain_code })
    }

    pub fn derive_path(&self, path: &str) -> Result<Self> {
        let path = Bip32Path::parse(path)?;
        let mut current = self.clone();
        for index in path.path {
            current = current.derive_child(index)?;
        }
        Ok(current)
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let secret = SecretKey::from_slice(self.secret.as_ref())
            .map_err(|e| KeyringError::KeyDerivation(format!("invalid secret key: {}", e)))?;
        Ok(secret.public_key())
    }

    pub fn to_extended_public(&self) -> Result<ExtendedPublicKey> {
        Ok(ExtendedPublicKey {
            public_key: self.public_key()?,
            chain_code: self.chain_code,
        })
    }
}

fn parse_scalar(bytes: &[u8]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::clone_from_slice(bytes)))
        .ok_or_else(|| KeyringError::KeyDerivation("derived tweak is not below the curve order".to_string()))
}

/// Lowercase `0x` address of a public key: last 20 bytes of Keccak-256 over
/// the uncompressed point without its `0x04` prefix.
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let encoded = public_key.to_encoded_point(false);
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// EIP-55 checksummed form of a hex address.
pub fn to_checksum_address(address: &str) -> Result<String> {
    let parsed = Address::from_str(address.trim())
        .map_err(|e| KeyringError::InvalidAddress(format!("{}: {}", address, e)))?;
    Ok(ethers::utils::to_checksum(&parsed, None))
}

/// Case-insensitive address comparison.
pub fn addresses_match(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x").eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

/// Derives the checksummed address at `suffix` below the unlocked root.
pub fn derive_address(master: Option<&ExtendedPublicKey>, suffix: &str) -> Result<String> {
    let master = master.ok_or(KeyringError::NotUnlocked)?;
    let child = master.derive_path(suffix)?;
    to_checksum_address(&child.address())
}
