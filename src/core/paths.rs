//! Derivation path policies
//!
//! Two account layouts are supported:
//! - Standard (Ledger Live / BIP44): one hardened account per index,
//!   `m/44'/60'/{index}'/0/0`. Every address needs its own device round-trip.
//! - Legacy: a single unlocked root (`m/44'/60'/0'` by default) with children
//!   `{root}/{index}` derived locally from the root public key.

use crate::core::errors::{KeyringError, Result};
use crate::core::derivation::to_checksum_address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Root path of the Ledger Live (BIP44) layout.
pub const LEDGER_LIVE_HD_PATH: &str = "m/44'/60'/0'/0/0";

/// Default root used by the legacy layout.
pub const LEGACY_HD_PATH: &str = "m/44'/60'/0'";

/// Upper bound of the brute-force index scan.
pub const MAX_INDEX: u32 = 1000;

/// Address → index cache filled while deriving legacy pages.
pub type PathCache = HashMap<String, u32>;

const HARDENED: u32 = 0x8000_0000;

/// Account layout selected by the configured root path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdPathPolicy {
    /// BIP44 account-per-index layout
    Standard,
    /// Single root with locally derived children
    Legacy,
}

impl HdPathPolicy {
    /// Selects the policy for a configured root path.
    pub fn from_hd_path(hd_path: &str) -> Self {
        if hd_path == LEDGER_LIVE_HD_PATH {
            HdPathPolicy::Standard
        } else {
            HdPathPolicy::Legacy
        }
    }

    pub fn is_standard(self) -> bool {
        matches!(self, HdPathPolicy::Standard)
    }

    /// Full derivation path of the account at `index`.
    pub fn path_for_index(self, index: u32, hd_path: &str) -> String {
        match self {
            HdPathPolicy::Standard => format!("m/44'/60'/{}'/0/0", index),
            HdPathPolicy::Legacy => format!("{}/{}", hd_path, index),
        }
    }

    /// Path suffix relative to the unlocked root, used for local derivation.
    pub fn local_suffix(self, index: u32) -> String {
        format!("m/{}", index)
    }
}

/// Recovers the legacy index of `address`.
///
/// The cache is consulted first; otherwise candidates `0..scan_limit` are
/// derived with `derive` until one matches.
pub fn index_for_address<F>(
    address: &str,
    cache: &PathCache,
    mut derive: F,
    scan_limit: u32,
) -> Result<u32>
where
    F: FnMut(u32) -> Result<String>,
{
    let checksummed = to_checksum_address(address)?;
    if let Some(index) = cache.get(&checksummed) {
        return Ok(*index);
    }

    for i in 0..scan_limit {
        if derive(i)? == checksummed {
            return Ok(i);
        }
    }

    Err(KeyringError::UnknownAddress(checksummed))
}

/// Path in the form the bridge expects (no leading `m/`).
pub fn to_device_path(path: &str) -> String {
    path.replacen("m/", "", 1)
}

/// Parsed BIP32 path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Path {
    pub path: Vec<u32>,
}

impl Bip32Path {
    pub fn new(path: Vec<u32>) -> Self {
        Self { path }
    }

    /// Parses `m/44'/60'/0'`-style paths. A bare `m` is the empty path.
    pub fn parse(path_str: &str) -> Result<Self> {
        if path_str == "m" {
            return Ok(Self { path: Vec::new() });
        }
        let rest = path_str
            .strip_prefix("m/")
            .ok_or_else(|| KeyringError::InvalidPath(format!("path must start with m/: {}", path_str)))?;

        let mut path = Vec::new();
        for part in rest.split('/') {
            if part.is_empty() {
                return Err(KeyringError::InvalidPath(format!("empty component in {}", path_str)));
            }

            let hardened = part.ends_with('\'') || part.ends_with('h');
            let num_str = part.trim_end_matches('\'').trim_end_matches('h');

            let num: u32 = num_str
                .parse()
                .map_err(|_| KeyringError::InvalidPath(format!("invalid component '{}' in {}", part, path_str)))?;
            if num >= HARDENED {
                return Err(KeyringError::InvalidPath(format!("index out of range: {}", part)));
            }

            path.push(if hardened { HARDENED | num } else { num });
        }

        Ok(Self { path })
    }

    pub fn is_hardened(index: u32) -> bool {
        index >= HARDENED
    }
}

impl FromStr for Bip32Path {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Bip32Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.path {
            if Self::is_hardened(*index) {
                write!(f, "/{}'", index & !HARDENED)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}
