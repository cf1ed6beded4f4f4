//! Simulated Ledger bridge
//!
//! Answers bridge requests from a seed, the way the hosted bridge page and a
//! connected device would. Replies are pushed back into the attached
//! transport synchronously from `post_message`.

use super::messages::{BridgeAction, BridgeRequest, BridgeResponse};
use super::transport::{BridgeChannel, BridgeTransport, WeakBridgeTransport};
use crate::core::derivation::{to_checksum_address, ExtendedPrivateKey};
use crate::core::errors::{KeyringError, Result};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::LocalWallet;
use ethers::types::{Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub struct MockLedgerBridge {
    seed_root: ExtendedPrivateKey,
    transport: Mutex<Option<WeakBridgeTransport>>,
    requests: Mutex<Vec<BridgeRequest>>,
    failures: Mutex<HashMap<BridgeAction, String>>,
    silent: Mutex<HashSet<BridgeAction>>,
    unlock_override: Mutex<Option<String>>,
    tamper_signatures: AtomicBool,
    reject_transport: AtomicBool,
}

impl MockLedgerBridge {
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Ok(Self {
            seed_root: ExtendedPrivateKey::from_seed(seed)?,
            transport: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            silent: Mutex::new(HashSet::new()),
            unlock_override: Mutex::new(None),
            tamper_signatures: AtomicBool::new(false),
            reject_transport: AtomicBool::new(false),
        })
    }

    /// Routes replies into `transport`.
    pub fn attach(&self, transport: &BridgeTransport) {
        *self.transport.lock() = Some(transport.downgrade());
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<BridgeRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, action: BridgeAction) -> usize {
        self.requests.lock().iter().filter(|r| r.action == action).count()
    }

    /// Fails the next request for `action` with `error` (empty for a bare failure).
    pub fn fail_next(&self, action: BridgeAction, error: &str) {
        self.failures.lock().insert(action, error.to_string());
    }

    /// Leaves requests for `action` unanswered.
    pub fn set_silent(&self, action: BridgeAction, silent: bool) {
        let mut set = self.silent.lock();
        if silent {
            set.insert(action);
        } else {
            set.remove(&action);
        }
    }

    /// Reports `address` for every unlock, as a different device would.
    pub fn set_unlock_address(&self, address: Option<&str>) {
        *self.unlock_override.lock() = address.map(str::to_string);
    }

    /// Signs with an unrelated key from now on.
    pub fn set_tamper_signatures(&self, tamper: bool) {
        self.tamper_signatures.store(tamper, Ordering::SeqCst);
    }

    pub fn set_reject_transport_update(&self, reject: bool) {
        self.reject_transport.store(reject, Ordering::SeqCst);
    }

    /// Pushes an unsolicited connection-change event.
    pub fn emit_connection(&self, connected: bool) {
        if let Some(transport) = self.attached() {
            transport.handle_inbound(BridgeResponse::connection_event(connected));
        }
    }

    /// Address the device derives at `path` (with or without the `m/` prefix).
    pub fn address_at(&self, path: &str) -> Result<String> {
        let key = self.key_at(path)?;
        to_checksum_address(&key.to_extended_public()?.address())
    }

    fn attached(&self) -> Option<BridgeTransport> {
        self.transport.lock().as_ref().and_then(WeakBridgeTransport::upgrade)
    }

    fn key_at(&self, path: &str) -> Result<ExtendedPrivateKey> {
        let full = if path.starts_with("m/") || path == "m" {
            path.to_string()
        } else {
            format!("m/{}", path)
        };
        self.seed_root.derive_path(&full)
    }

    fn param<'a>(request: &'a BridgeRequest, name: &str) -> Result<&'a str> {
        request
            .params
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| KeyringError::MalformedResponse(format!("missing param {}", name)))
    }

    fn respond(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
        let id = request.message_id.as_str();
        let payload = match request.action {
            BridgeAction::Unlock => {
                let key = self.key_at(Self::param(request, "hdPath")?)?;
                let xpub = key.to_extended_public()?;
                let forced = self.unlock_override.lock().clone();
                let address = match forced {
                    Some(address) => address,
                    None => to_checksum_address(&xpub.address())?,
                };
                json!({
                    "address": address,
                    "publicKey": hex::encode(xpub.public_key().to_encoded_point(false).as_bytes()),
                    "chainCode": hex::encode(xpub.chain_code()),
                })
            }
            BridgeAction::MakeApp => json!({}),
            BridgeAction::UpdateTransport => {
                if self.reject_transport.load(Ordering::SeqCst) {
                    return Ok(BridgeResponse {
                        success: false,
                        action: Some(request.action.as_str().to_string()),
                        message_id: Some(id.to_string()),
                        payload: json!({}),
                    });
                }
                json!({})
            }
            BridgeAction::SignTransaction => {
                let raw = hex::decode(Self::param(request, "tx")?)?;
                let signature = self.sign(Self::param(request, "hdPath")?, keccak256(raw))?;
                let bit = signature.v - 27;
                json!({
                    "r": hex_word(signature.r),
                    "s": hex_word(signature.s),
                    "v": format!("{:02x}", bit),
                })
            }
            BridgeAction::SignPersonalMessage => {
                let message = hex::decode(Self::param(request, "message")?)?;
                let digest = hash_message(message);
                let signature = self.sign(Self::param(request, "hdPath")?, digest.0)?;
                json!({ "r": hex_word(signature.r), "s": hex_word(signature.s), "v": signature.v })
            }
            BridgeAction::SignTypedData => {
                let domain = hex::decode(Self::param(request, "domainSeparatorHex")?)?;
                let message = hex::decode(Self::param(request, "hashStructMessageHex")?)?;
                let mut preimage = vec![0x19, 0x01];
                preimage.extend_from_slice(&domain);
                preimage.extend_from_slice(&message);
                let signature = self.sign(Self::param(request, "hdPath")?, keccak256(preimage))?;
                json!({ "r": hex_word(signature.r), "s": hex_word(signature.s), "v": signature.v })
            }
            BridgeAction::ConnectionChange => json!({}),
        };
        Ok(BridgeResponse::success(id, request.action, payload))
    }

    fn sign(&self, path: &str, digest: [u8; 32]) -> Result<Signature> {
        let key = if self.tamper_signatures.load(Ordering::SeqCst) {
            self.seed_root.derive_path("m/1'/2'/3'")?
        } else {
            self.key_at(path)?
        };
        let signing_key = SigningKey::from_slice(key.secret_bytes())
            .map_err(|e| KeyringError::KeyDerivation(e.to_string()))?;
        LocalWallet::from(signing_key)
            .sign_hash(H256::from(digest))
            .map_err(|e| KeyringError::Bridge(e.to_string()))
    }
}

fn hex_word(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    hex::encode(bytes)
}

impl BridgeChannel for MockLedgerBridge {
    fn post_message(&self, request: &BridgeRequest) -> Result<()> {
        self.requests.lock().push(request.clone());

        if self.silent.lock().contains(&request.action) {
            debug!("mock bridge leaving {} unanswered", request.action);
            return Ok(());
        }

        let injected = self.failures.lock().remove(&request.action);
        let response = match injected {
            Some(error) if error.is_empty() => BridgeResponse {
                success: false,
                action: Some(request.action.as_str().to_string()),
                message_id: Some(request.message_id.clone()),
                payload: json!({}),
            },
            Some(error) => BridgeResponse::failure(&request.message_id, request.action, &error),
            None => self.respond(request).unwrap_or_else(|e| {
                BridgeResponse::failure(&request.message_id, request.action, &e.to_string())
            }),
        };

        match self.attached() {
            Some(transport) => transport.handle_inbound(response),
            None => debug!("mock bridge has no transport attached"),
        }
        Ok(())
    }
}
