//! Keyring configuration
//!
//! Loaded from TOML with per-field defaults, then overridden from `LEDGER_*`
//! environment variables and validated.

use crate::core::errors::{KeyringError, Result};
use crate::core::paths::{LEGACY_HD_PATH, MAX_INDEX};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default hosted bridge page.
pub const DEFAULT_BRIDGE_URL: &str = "https://metamask.github.io/eth-ledger-bridge-keyring";

/// Keyring configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringConfig {
    /// Root derivation path; selects the account layout
    #[serde(default = "KeyringConfig::default_hd_path")]
    pub hd_path: String,

    /// Endpoint of the hosted bridge
    #[serde(default = "KeyringConfig::default_bridge_url")]
    pub bridge_url: String,

    /// Stop BIP44 discovery at the first account without history
    #[serde(default)]
    pub implement_full_bip44: bool,

    /// Network used for transaction-history lookups
    #[serde(default = "KeyringConfig::default_network")]
    pub network: String,

    /// Accounts per discovery page
    #[serde(default = "KeyringConfig::default_per_page")]
    pub per_page: u32,

    /// Upper bound for legacy index recovery
    #[serde(default = "KeyringConfig::default_max_scan_index")]
    pub max_scan_index: u32,

    /// Bridge request timeout (seconds, 0 = wait indefinitely)
    #[serde(default)]
    pub request_timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etherscan_api_key: Option<String>,
}

impl KeyringConfig {
    fn default_hd_path() -> String {
        LEGACY_HD_PATH.to_string()
    }

    fn default_bridge_url() -> String {
        DEFAULT_BRIDGE_URL.to_string()
    }

    fn default_network() -> String {
        "mainnet".to_string()
    }

    fn default_per_page() -> u32 {
        5
    }

    fn default_max_scan_index() -> u32 {
        MAX_INDEX
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| KeyringError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KeyringError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `LEDGER_*` / `ETHERSCAN_API_KEY` overrides from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LEDGER_BRIDGE_URL") {
            debug!("bridge url overridden from environment");
            self.bridge_url = url;
        }
        if let Some(path) = lookup("LEDGER_HD_PATH") {
            self.hd_path = path;
        }
        if let Some(network) = lookup("LEDGER_NETWORK") {
            self.network = network;
        }
        if let Some(key) = lookup("ETHERSCAN_API_KEY") {
            self.etherscan_api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(secs) = lookup("LEDGER_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .map_err(|_| KeyringError::Config(format!("invalid LEDGER_REQUEST_TIMEOUT_SECS: {}", secs)))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.hd_path.starts_with("m/") {
            return Err(KeyringError::Config(format!("hd_path must start with m/: {}", self.hd_path)));
        }
        if self.per_page == 0 {
            return Err(KeyringError::Config("per_page must be positive".to_string()));
        }
        if self.bridge_url.is_empty() {
            return Err(KeyringError::Config("bridge_url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            hd_path: Self::default_hd_path(),
            bridge_url: Self::default_bridge_url(),
            implement_full_bip44: false,
            network: Self::default_network(),
            per_page: Self::default_per_page(),
            max_scan_index: Self::default_max_scan_index(),
            request_timeout_secs: 0,
            etherscan_api_key: None,
        }
    }
}
