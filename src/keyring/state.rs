//! Persisted keyring state and legacy migration.

use crate::core::accounts::AccountDetails;
use crate::core::derivation::{derive_address, to_checksum_address, ExtendedPublicKey};
use crate::core::paths::{index_for_address, HdPathPolicy, PathCache};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Keyring state as stored by the host wallet.
///
/// Field names follow the host wallet's format. `derivationRootPath`,
/// `channelEndpoint` and `fullDiscoveryEnabled` are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedKeyring {
    #[serde(default, alias = "derivationRootPath", skip_serializing_if = "Option::is_none")]
    pub hd_path: Option<String>,

    #[serde(default)]
    pub accounts: Vec<String>,

    /// Absent in state written before per-account details existed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_details: Option<BTreeMap<String, AccountDetails>>,

    #[serde(default, alias = "channelEndpoint", skip_serializing_if = "Option::is_none")]
    pub bridge_url: Option<String>,

    #[serde(rename = "implementFullBIP44", alias = "fullDiscoveryEnabled", default)]
    pub implement_full_bip44: bool,

    /// Ledger Live account indices from older state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_indexes: Option<BTreeMap<String, u32>>,
}

impl SerializedKeyring {
    pub fn from_json(raw: &str) -> crate::core::errors::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> crate::core::errors::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Rebuilds account details for state that predates them.
///
/// Ledger Live roots use the stored account indices. Legacy roots recover
/// each account's index by scanning below the unlocked root; accounts that
/// cannot be recovered are logged and left without details.
pub(crate) fn migrate_account_details(
    state: &SerializedKeyring,
    hd_path: &str,
    master: Option<&ExtendedPublicKey>,
    cache: &PathCache,
    scan_limit: u32,
) -> BTreeMap<String, AccountDetails> {
    let policy = HdPathPolicy::from_hd_path(hd_path);
    let mut details = BTreeMap::new();

    match policy {
        HdPathPolicy::Standard => {
            for (account, index) in state.account_indexes.iter().flatten() {
                match to_checksum_address(account) {
                    Ok(address) => {
                        details.insert(
                            address,
                            AccountDetails {
                                hd_path: policy.path_for_index(*index, hd_path),
                                bip44: true,
                            },
                        );
                    }
                    Err(e) => warn!("failed to migrate account {}: {}", account, e),
                }
            }
        }
        HdPathPolicy::Legacy => {
            for account in &state.accounts {
                let recovered = to_checksum_address(account).and_then(|address| {
                    let index = index_for_address(
                        &address,
                        cache,
                        |i| derive_address(master, &policy.local_suffix(i)),
                        scan_limit,
                    )?;
                    Ok((address, index))
                });
                match recovered {
                    Ok((address, index)) => {
                        debug!("migrated {} to index {}", address, index);
                        details.insert(
                            address,
                            AccountDetails {
                                hd_path: policy.path_for_index(index, hd_path),
                                bip44: false,
                            },
                        );
                    }
                    Err(e) => warn!("failed to migrate account {}: {}", account, e),
                }
            }
        }
    }

    details
}
