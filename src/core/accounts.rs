//! Account store
//!
//! Keeps the ordered account list, the per-account details and the legacy
//! path cache together so they are always mutated in one step.

use crate::core::derivation::{addresses_match, to_checksum_address};
use crate::core::errors::{KeyringError, Result};
use crate::core::paths::PathCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-account metadata, serialized in the host wallet's format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    /// Full derivation path of the account
    #[serde(rename = "hdPath")]
    pub hd_path: String,
    /// Whether the account uses the Ledger Live (BIP44) layout
    pub bip44: bool,
}

/// One entry of an account discovery page. Balances are resolved elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPageEntry {
    pub address: String,
    pub balance: Option<String>,
    pub index: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AccountStore {
    accounts: Vec<String>,
    details: BTreeMap<String, AccountDetails>,
    paths: PathCache,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted parts and prunes entries that break the
    /// list/details pairing.
    pub fn from_parts(accounts: Vec<String>, details: BTreeMap<String, AccountDetails>) -> Self {
        let mut store = Self {
            accounts: Vec::with_capacity(accounts.len()),
            details: BTreeMap::new(),
            paths: PathCache::new(),
        };
        for (address, detail) in details {
            match to_checksum_address(&address) {
                Ok(checksummed) => {
                    store.details.insert(checksummed, detail);
                }
                Err(e) => debug!("dropping details for malformed address {}: {}", address, e),
            }
        }
        for account in accounts {
            if let Ok(checksummed) = to_checksum_address(&account) {
                if !store.contains(&checksummed) {
                    store.accounts.push(checksummed);
                }
            }
        }
        store.prune();
        store
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn details(&self) -> &BTreeMap<String, AccountDetails> {
        &self.details
    }

    pub fn details_for(&self, address: &str) -> Option<&AccountDetails> {
        let checksummed = to_checksum_address(address).ok()?;
        self.details.get(&checksummed)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.accounts.iter().any(|a| addresses_match(a, address))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Records details for `address` and appends it if not yet listed.
    /// Returns whether the account list grew.
    pub fn insert(&mut self, address: &str, details: AccountDetails) -> Result<bool> {
        let checksummed = to_checksum_address(address)?;
        self.details.insert(checksummed.clone(), details);
        if self.contains(&checksummed) {
            return Ok(false);
        }
        self.accounts.push(checksummed);
        Ok(true)
    }

    pub fn remove(&mut self, address: &str) -> Result<()> {
        if !self.contains(address) {
            return Err(KeyringError::AccountNotFound(address.to_string()));
        }
        self.accounts.retain(|a| !addresses_match(a, address));
        if let Ok(checksummed) = to_checksum_address(address) {
            self.details.remove(&checksummed);
            self.paths.remove(&checksummed);
        }
        Ok(())
    }

    /// Drops listed accounts lacking details and details lacking an account.
    /// Returns the removed account addresses.
    pub fn prune(&mut self) -> Vec<String> {
        let details = &self.details;
        let (kept, removed): (Vec<String>, Vec<String>) =
            self.accounts.drain(..).partition(|a| details.contains_key(a));
        self.accounts = kept;
        let accounts = &self.accounts;
        self.details.retain(|address, _| accounts.contains(address));
        removed
    }

    pub fn cache_index(&mut self, address: &str, index: u32) -> Result<()> {
        let checksummed = to_checksum_address(address)?;
        self.paths.insert(checksummed, index);
        Ok(())
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.paths
    }

    pub fn clear_path_cache(&mut self) {
        self.paths.clear();
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
        self.details.clear();
        self.paths.clear();
    }

    /// Every listed account has details and every detail has an account.
    pub fn is_consistent(&self) -> bool {
        self.accounts.len() == self.details.len()
            && self.accounts.iter().all(|a| self.details.contains_key(a))
    }
}
