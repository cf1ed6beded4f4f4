//! Device signing with signer verification
//!
//! Every signature returned by the bridge is checked against the account it
//! was requested for before it is handed back.

use super::signature::SignatureComponents;
use super::LedgerBridgeKeyring;
use crate::bridge::messages::{BridgeAction, SignaturePayload};
use crate::core::derivation::{addresses_match, to_checksum_address};
use crate::core::errors::{KeyringError, Result};
use crate::core::paths::to_device_path;
use ethers::signers::to_eip155_v;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::{Eip712, TypedData};
use ethers::types::{Bytes, Signature, H256};
use ethers::utils::{hash_message, keccak256};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Only typed-data version the device signs.
pub const TYPED_DATA_VERSION: &str = "V4";

/// Transaction signed by the device and verified locally.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub transaction: TypedTransaction,
    pub signature: Signature,
    /// Signed RLP, ready to broadcast
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(&self.raw))
    }
}

impl LedgerBridgeKeyring {
    /// Unlocks the stored path of `address` and checks the device derives
    /// the same address there. Returns the path.
    pub async fn unlock_account_by_address(&self, address: &str) -> Result<String> {
        let stored = self.state.lock().store.details_for(address).map(|d| d.hd_path.clone());
        let hd_path = stored.ok_or_else(|| KeyringError::AccountNotFound(address.to_string()))?;

        let device_address = self.unlock_path(&hd_path, false).await?;
        if !addresses_match(&device_address, address) {
            warn!("device reports {} at {}, expected {}", device_address, hd_path, address);
            return Err(KeyringError::ForeignAccount(to_checksum_address(address)?));
        }
        Ok(hd_path)
    }

    /// Signs `tx` on the device. The returned signature must recover to
    /// `address` over the transaction's signing hash.
    pub async fn sign_transaction(&self, address: &str, tx: &TypedTransaction) -> Result<SignedTransaction> {
        let hd_path = self.unlock_account_by_address(address).await?;
        let components = self
            .request_signature(
                BridgeAction::SignTransaction,
                json!({ "tx": hex::encode(tx.rlp()), "hdPath": to_device_path(&hd_path) }),
                "Ledger: Unknown error while signing transaction",
            )
            .await?;

        let sighash = tx.sighash();
        let signer = components
            .recover_prehash(sighash.as_fixed_bytes())
            .map_err(|_| KeyringError::InvalidSignature)?;
        if !addresses_match(&signer, address) {
            return Err(KeyringError::InvalidSignature);
        }

        let v = match (tx.chain_id(), tx) {
            (Some(chain_id), _) => to_eip155_v(components.recovery_bit, chain_id.as_u64()),
            (None, TypedTransaction::Legacy(_)) => u64::from(components.recovery_value()),
            (None, _) => to_eip155_v(components.recovery_bit, 1),
        };
        let signature = components.to_ethers(v);
        let raw = tx.rlp_signed(&signature);
        info!("transaction signed by {}", signer);

        Ok(SignedTransaction { transaction: tx.clone(), signature, raw })
    }

    /// EIP-191 personal message signature as `0x{r}{s}{v}`.
    pub async fn sign_personal_message(&self, address: &str, message: &[u8]) -> Result<String> {
        let hd_path = self.unlock_account_by_address(address).await?;
        let components = self
            .request_signature(
                BridgeAction::SignPersonalMessage,
                json!({ "hdPath": to_device_path(&hd_path), "message": hex::encode(message) }),
                "Ledger: Unknown error while signing message",
            )
            .await?;

        let digest = hash_message(message);
        self.verify_signer(&components, digest.as_fixed_bytes(), address)?;
        Ok(components.to_rsv_hex())
    }

    /// Same as [`sign_personal_message`](Self::sign_personal_message).
    pub async fn sign_message(&self, address: &str, message: &[u8]) -> Result<String> {
        self.sign_personal_message(address, message).await
    }

    /// EIP-712 signature. Only `V4` is supported; other versions fail
    /// before the bridge is contacted.
    pub async fn sign_typed_data(&self, address: &str, data: &TypedData, version: &str) -> Result<String> {
        if version != TYPED_DATA_VERSION {
            return Err(KeyringError::UnsupportedVersion(version.to_string()));
        }

        let domain_separator = data
            .domain_separator()
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;
        let struct_hash = data
            .struct_hash()
            .map_err(|e| KeyringError::Serialization(e.to_string()))?;

        let hd_path = self.unlock_account_by_address(address).await?;
        let components = self
            .request_signature(
                BridgeAction::SignTypedData,
                json!({
                    "hdPath": to_device_path(&hd_path),
                    "domainSeparatorHex": hex::encode(domain_separator),
                    "hashStructMessageHex": hex::encode(struct_hash),
                }),
                "Ledger: Unknown error while signing typed data",
            )
            .await?;

        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&domain_separator);
        preimage.extend_from_slice(&struct_hash);
        self.verify_signer(&components, &keccak256(preimage), address)?;
        Ok(components.to_rsv_hex())
    }

    async fn request_signature(&self, action: BridgeAction, params: Value, unknown: &str) -> Result<SignatureComponents> {
        let response = self.transport().request(action, params).await?;
        if !response.success {
            return Err(response.into_error(KeyringError::Bridge(unknown.to_string())));
        }
        let payload: SignaturePayload = response.decode_payload()?;
        SignatureComponents::from_payload(&payload)
    }

    fn verify_signer(&self, components: &SignatureComponents, digest: &[u8; 32], address: &str) -> Result<()> {
        let signer = components
            .recover_prehash(digest)
            .map_err(|_| KeyringError::AddressMismatch)?;
        if !addresses_match(&signer, address) {
            warn!("signature recovers to {}, expected {}", signer, address);
            return Err(KeyringError::AddressMismatch);
        }
        Ok(())
    }
}
