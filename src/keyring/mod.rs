//! Ledger bridge keyring
//!
//! Composes the account store, the derivation policies and the bridge
//! transport. All private-key work happens on the device; this side only
//! derives public addresses and verifies what the device returns.
//!
//! Keyring state sits behind one mutex that is never held across an
//! `.await`, so account-list and details updates are observed atomically.

use crate::bridge::messages::{BridgeAction, TransportMode, UnlockPayload};
use crate::bridge::transport::{BridgeChannel, BridgeTransport};
use crate::chain::{EtherscanClient, Network, TransactionHistory};
use crate::core::accounts::{AccountDetails, AccountPageEntry, AccountStore};
use crate::core::config::KeyringConfig;
use crate::core::derivation::{derive_address, to_checksum_address, ExtendedPublicKey, MasterKeyMaterial};
use crate::core::errors::{KeyringError, Result};
use crate::core::paths::{to_device_path, HdPathPolicy};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub mod signature;
pub mod signing;
pub mod state;

pub use signature::SignatureComponents;
pub use signing::SignedTransaction;
pub use state::SerializedKeyring;

/// Keyring type reported to the host wallet.
pub const KEYRING_TYPE: &str = "Ledger Hardware";

/// Result of [`LedgerBridgeKeyring::unlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Root key material was already present; no device round-trip happened.
    AlreadyUnlocked,
    /// Checksummed address the device reported for the requested path.
    Address(String),
}

impl UnlockOutcome {
    pub fn address(&self) -> Option<&str> {
        match self {
            UnlockOutcome::AlreadyUnlocked => None,
            UnlockOutcome::Address(address) => Some(address),
        }
    }
}

struct KeyringState {
    hd_path: String,
    bridge_url: String,
    implement_full_bip44: bool,
    store: AccountStore,
    master: Option<ExtendedPublicKey>,
    page: u32,
    per_page: u32,
    account_to_unlock: u32,
    max_scan_index: u32,
}

impl KeyringState {
    fn from_config(config: &KeyringConfig) -> Self {
        Self {
            hd_path: config.hd_path.clone(),
            bridge_url: config.bridge_url.clone(),
            implement_full_bip44: config.implement_full_bip44,
            store: AccountStore::new(),
            master: None,
            page: 0,
            per_page: config.per_page,
            account_to_unlock: 0,
            max_scan_index: config.max_scan_index,
        }
    }

    fn policy(&self) -> HdPathPolicy {
        HdPathPolicy::from_hd_path(&self.hd_path)
    }

    fn derive_local(&self, index: u32) -> Result<String> {
        derive_address(self.master.as_ref(), &self.policy().local_suffix(index))
    }
}

pub struct LedgerBridgeKeyring {
    transport: RwLock<BridgeTransport>,
    state: Mutex<KeyringState>,
    history: Arc<dyn TransactionHistory>,
    default_bridge_url: String,
}

impl LedgerBridgeKeyring {
    /// Keyring over `channel`, with Etherscan-backed discovery.
    pub fn new(channel: Arc<dyn BridgeChannel>, config: KeyringConfig) -> Self {
        let transport = BridgeTransport::with_timeout(channel, config.request_timeout());
        let history = EtherscanClient::new(Network::from_name(&config.network))
            .with_api_key(config.etherscan_api_key.clone());
        Self::with_transport(transport, config, Arc::new(history))
    }

    pub fn with_transport(
        transport: BridgeTransport,
        config: KeyringConfig,
        history: Arc<dyn TransactionHistory>,
    ) -> Self {
        info!("Ledger keyring created (hd path {})", config.hd_path);
        Self {
            transport: RwLock::new(transport),
            state: Mutex::new(KeyringState::from_config(&config)),
            history,
            default_bridge_url: config.bridge_url,
        }
    }

    pub fn keyring_type(&self) -> &'static str {
        KEYRING_TYPE
    }

    /// Current transport handle.
    pub fn transport(&self) -> BridgeTransport {
        self.transport.read().clone()
    }

    // ---- state ---------------------------------------------------------

    pub fn serialize(&self) -> SerializedKeyring {
        let state = self.state.lock();
        SerializedKeyring {
            hd_path: Some(state.hd_path.clone()),
            accounts: state.store.accounts().to_vec(),
            account_details: Some(state.store.details().clone()),
            bridge_url: Some(state.bridge_url.clone()),
            implement_full_bip44: state.implement_full_bip44,
            account_indexes: None,
        }
    }

    /// Restores state. Details missing from older state are migrated; accounts
    /// left without details are dropped.
    pub fn deserialize(&self, serialized: SerializedKeyring) {
        let mut state = self.state.lock();

        let hd_path = serialized
            .hd_path
            .clone()
            .unwrap_or_else(|| crate::core::paths::LEGACY_HD_PATH.to_string());
        if hd_path != state.hd_path {
            state.master = None;
        }
        state.hd_path = hd_path;
        state.bridge_url = serialized
            .bridge_url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.default_bridge_url.clone());
        state.implement_full_bip44 = serialized.implement_full_bip44;

        let details = match serialized.account_details.clone() {
            Some(details) => details,
            None => self::state::migrate_account_details(
                &serialized,
                &state.hd_path,
                state.master.as_ref(),
                state.store.path_cache(),
                state.max_scan_index,
            ),
        };
        state.store = AccountStore::from_parts(serialized.accounts, details);
        info!("Ledger keyring restored with {} account(s)", state.store.len());
    }

    /// Installs root key material obtained elsewhere (e.g. an exported xpub).
    pub fn load_master_key(&self, material: &MasterKeyMaterial) -> Result<()> {
        let xpub = material.to_extended()?;
        self.state.lock().master = Some(xpub);
        Ok(())
    }

    // ---- unlock --------------------------------------------------------

    pub fn is_unlocked(&self) -> bool {
        self.state.lock().master.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.transport().is_device_connected()
    }

    /// Asks the device for the address at `hd_path` (the configured root when
    /// `None`). With `commit`, the returned public key and chain code become
    /// the root key material.
    pub async fn unlock(&self, hd_path: Option<&str>, commit: bool) -> Result<UnlockOutcome> {
        if hd_path.is_none() && self.is_unlocked() {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }
        let path = match hd_path {
            Some(path) => path.to_string(),
            None => self.state.lock().hd_path.clone(),
        };
        let address = self.unlock_path(&path, commit).await?;
        Ok(UnlockOutcome::Address(address))
    }

    pub(crate) async fn unlock_path(&self, path: &str, commit: bool) -> Result<String> {
        let response = self
            .transport()
            .request(BridgeAction::Unlock, json!({ "hdPath": to_device_path(path) }))
            .await?;
        if !response.success {
            return Err(response.into_error(KeyringError::UnknownChannelError));
        }

        let payload: UnlockPayload = response.decode_payload()?;
        if commit {
            let (public_key, chain_code) = match (&payload.public_key, &payload.chain_code) {
                (Some(pk), Some(cc)) => (pk, cc),
                _ => {
                    return Err(KeyringError::MalformedResponse(
                        "unlock payload lacks publicKey/chainCode".to_string(),
                    ))
                }
            };
            let xpub = MasterKeyMaterial::from_hex(public_key, chain_code)?.to_extended()?;
            self.state.lock().master = Some(xpub);
            info!("Ledger unlocked at {}", path);
        }

        to_checksum_address(&payload.address)
    }

    // ---- accounts ------------------------------------------------------

    pub fn set_account_to_unlock(&self, index: u32) {
        self.state.lock().account_to_unlock = index;
    }

    /// Adds `count` accounts starting at the account-to-unlock index.
    pub async fn add_accounts(&self, count: u32) -> Result<Vec<String>> {
        self.unlock(None, true).await?;

        let (from, policy, hd_path) = {
            let state = self.state.lock();
            (state.account_to_unlock, state.policy(), state.hd_path.clone())
        };

        for index in from..from.saturating_add(count) {
            let path = policy.path_for_index(index, &hd_path);
            let address = if policy.is_standard() {
                self.unlock_path(&path, false).await?
            } else {
                let state = self.state.lock();
                state.derive_local(index)?
            };

            let mut state = self.state.lock();
            if policy == HdPathPolicy::Legacy {
                state.store.cache_index(&address, index)?;
            }
            if state.store.insert(&address, AccountDetails { hd_path: path, bip44: policy.is_standard() })? {
                debug!("added account {} at index {}", address, index);
            }
            state.page = 0;
        }

        Ok(self.get_accounts())
    }

    pub fn get_accounts(&self) -> Vec<String> {
        self.state.lock().store.accounts().to_vec()
    }

    pub fn account_details(&self) -> BTreeMap<String, AccountDetails> {
        self.state.lock().store.details().clone()
    }

    pub fn remove_account(&self, address: &str) -> Result<()> {
        self.state.lock().store.remove(address)?;
        info!("removed account {}", address);
        Ok(())
    }

    pub async fn get_first_page(&self) -> Result<Vec<AccountPageEntry>> {
        self.state.lock().page = 0;
        self.get_page(1).await
    }

    pub async fn get_next_page(&self) -> Result<Vec<AccountPageEntry>> {
        self.get_page(1).await
    }

    pub async fn get_previous_page(&self) -> Result<Vec<AccountPageEntry>> {
        self.get_page(-1).await
    }

    /// Current 1-based page cursor (0 before the first page).
    pub fn current_page(&self) -> u32 {
        self.state.lock().page
    }

    async fn get_page(&self, increment: i64) -> Result<Vec<AccountPageEntry>> {
        let (from, to) = {
            let mut state = self.state.lock();
            state.page = (i64::from(state.page) + increment).max(1) as u32;
            let from = (state.page - 1).saturating_mul(state.per_page);
            (from, from.saturating_add(state.per_page))
        };

        self.unlock(None, true).await?;

        let (policy, hd_path, full_discovery) = {
            let state = self.state.lock();
            (state.policy(), state.hd_path.clone(), state.implement_full_bip44)
        };

        match policy {
            HdPathPolicy::Standard => self.bip44_page(from, to, &hd_path, full_discovery).await,
            HdPathPolicy::Legacy => self.legacy_page(from, to),
        }
    }

    async fn bip44_page(&self, from: u32, to: u32, hd_path: &str, full_discovery: bool) -> Result<Vec<AccountPageEntry>> {
        let mut entries = Vec::new();
        for index in from..to {
            let path = HdPathPolicy::Standard.path_for_index(index, hd_path);
            let address = self.unlock_path(&path, false).await?;
            let used = if full_discovery {
                self.history.has_previous_transactions(&address).await?
            } else {
                true
            };

            entries.push(AccountPageEntry { address, balance: None, index });
            if !used {
                debug!("discovery stopped at unused account {}", index);
                break;
            }
        }
        Ok(entries)
    }

    fn legacy_page(&self, from: u32, to: u32) -> Result<Vec<AccountPageEntry>> {
        let mut state = self.state.lock();
        let mut entries = Vec::with_capacity((to - from) as usize);
        for index in from..to {
            let address = state.derive_local(index)?;
            state.store.cache_index(&address, index)?;
            entries.push(AccountPageEntry { address, balance: None, index });
        }
        Ok(entries)
    }

    // ---- configuration & lifecycle --------------------------------------

    pub fn hd_path(&self) -> String {
        self.state.lock().hd_path.clone()
    }

    /// Switches the root path. A different root invalidates the unlocked key
    /// and the legacy index cache.
    pub fn set_hd_path(&self, hd_path: &str) {
        let mut state = self.state.lock();
        if state.hd_path != hd_path {
            state.master = None;
            state.store.clear_path_cache();
            info!("hd path changed to {}", hd_path);
        }
        state.hd_path = hd_path.to_string();
    }

    pub fn bridge_url(&self) -> String {
        self.state.lock().bridge_url.clone()
    }

    /// Records a new bridge endpoint. Returns whether it changed; on change
    /// the owner is expected to open a new channel and `replace_transport`.
    pub fn set_bridge_url(&self, url: &str) -> bool {
        let mut state = self.state.lock();
        if state.bridge_url == url {
            return false;
        }
        state.bridge_url = url.to_string();
        true
    }

    /// Swaps in a transport for a new channel. Requests pending on the old
    /// one are cancelled.
    pub fn replace_transport(&self, transport: BridgeTransport) {
        let old = std::mem::replace(&mut *self.transport.write(), transport);
        let cancelled = old.cancel_all();
        old.clear_connection_handler();
        debug!("transport replaced, {} pending request(s) cancelled", cancelled);
    }

    /// Opens the Ethereum app on the device.
    pub async fn attempt_make_app(&self) -> Result<bool> {
        let response = self.transport().request(BridgeAction::MakeApp, json!({})).await?;
        if response.success {
            Ok(true)
        } else {
            Err(response.into_error(KeyringError::UnknownChannelError))
        }
    }

    pub async fn update_transport_method(&self, mode: TransportMode) -> Result<bool> {
        self.transport().configure_transport_mode(mode).await
    }

    /// Forgets every account and the unlocked root key.
    pub fn forget_device(&self) {
        let mut state = self.state.lock();
        state.store.clear();
        state.master = None;
        state.page = 0;
        state.account_to_unlock = 0;
        info!("Ledger device forgotten");
    }

    /// Cancels outstanding requests and drops the connection subscription.
    pub fn destroy(&self) {
        let transport = self.transport();
        let cancelled = transport.cancel_all();
        transport.clear_connection_handler();
        debug!("keyring destroyed, {} pending request(s) cancelled", cancelled);
    }

    pub fn export_account(&self, _address: &str) -> Result<String> {
        Err(KeyringError::NotSupported("exporting private keys".to_string()))
    }
}
