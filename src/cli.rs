use crate::bridge::messages::BridgeRequest;
use crate::bridge::transport::{BridgeChannel, BridgeTransport};
use crate::chain::StaticTransactionHistory;
use crate::core::config::KeyringConfig;
use crate::core::derivation::{derive_address, MasterKeyMaterial};
use crate::core::errors::{KeyringError, Result as KeyringResult};
use crate::core::paths::{HdPathPolicy, LEGACY_HD_PATH};
use crate::keyring::{LedgerBridgeKeyring, SerializedKeyring};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ledger keyring offline tooling
#[derive(Debug, Parser)]
#[command(name = "ledger-keyring", about = "Ledger bridge keyring tooling", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Keyring configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List legacy addresses derived from an exported root key
    Derive {
        #[command(flatten)]
        key: RootKeyArgs,
        #[arg(long, default_value = LEGACY_HD_PATH)]
        hd_path: String,
        #[arg(long, default_value_t = 0)]
        start: u32,
        #[arg(long, default_value_t = 5)]
        count: u32,
    },
    /// Print the derivation path of an account index
    Path {
        #[arg(long)]
        index: u32,
        #[arg(long, default_value = LEGACY_HD_PATH)]
        hd_path: String,
    },
    /// Load serialized keyring state and list its accounts
    Inspect {
        #[arg(long)]
        state: PathBuf,
    },
    /// Rewrite serialized keyring state with per-account details
    Migrate {
        #[arg(long)]
        state: PathBuf,
        #[command(flatten)]
        key: OptionalRootKeyArgs,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct RootKeyArgs {
    /// Root public key, hex (compressed or uncompressed)
    #[arg(long)]
    pub public_key: String,
    /// Root chain code, hex
    #[arg(long)]
    pub chain_code: String,
}

#[derive(Debug, Args)]
pub struct OptionalRootKeyArgs {
    #[arg(long, requires = "chain_code")]
    pub public_key: Option<String>,
    #[arg(long, requires = "public_key")]
    pub chain_code: Option<String>,
}

/// Channel for a keyring with no device attached. Never becomes ready.
struct OfflineChannel;

impl BridgeChannel for OfflineChannel {
    fn post_message(&self, _request: &BridgeRequest) -> KeyringResult<()> {
        Err(KeyringError::ChannelNotReady)
    }
}

fn offline_keyring(config: KeyringConfig) -> LedgerBridgeKeyring {
    LedgerBridgeKeyring::with_transport(
        BridgeTransport::new(Arc::new(OfflineChannel)),
        config,
        Arc::new(StaticTransactionHistory::default()),
    )
}

pub fn load_config(path: Option<&Path>) -> Result<KeyringConfig> {
    match path {
        Some(path) => KeyringConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => {
            let mut config = KeyringConfig::default();
            config.apply_env_overrides()?;
            Ok(config)
        }
    }
}

/// Runs a command and returns what it prints.
pub fn run(cli: Cli) -> Result<String> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Derive { key, hd_path, start, count } => derive(&key, &hd_path, start, count),
        Commands::Path { index, hd_path } => {
            Ok(format!("{}\n", HdPathPolicy::from_hd_path(&hd_path).path_for_index(index, &hd_path)))
        }
        Commands::Inspect { state } => inspect(config, &state),
        Commands::Migrate { state, key, output } => migrate(config, &state, &key, output.as_deref()),
    }
}

fn derive(key: &RootKeyArgs, hd_path: &str, start: u32, count: u32) -> Result<String> {
    let policy = HdPathPolicy::from_hd_path(hd_path);
    if policy.is_standard() {
        anyhow::bail!("{} uses one device key per account; addresses cannot be derived offline", hd_path);
    }
    let xpub = MasterKeyMaterial::from_hex(&key.public_key, &key.chain_code)?.to_extended()?;

    let mut out = String::new();
    for index in start..start.saturating_add(count) {
        let address = derive_address(Some(&xpub), &policy.local_suffix(index))?;
        writeln!(out, "{}\t{}\t{}", index, address, policy.path_for_index(index, hd_path))?;
    }
    Ok(out)
}

fn read_state(path: &Path) -> Result<SerializedKeyring> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    SerializedKeyring::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn restore(config: KeyringConfig, state: SerializedKeyring, key: Option<&MasterKeyMaterial>) -> Result<LedgerBridgeKeyring> {
    let keyring = offline_keyring(config);
    if let Some(hd_path) = &state.hd_path {
        keyring.set_hd_path(hd_path);
    } else {
        keyring.set_hd_path(LEGACY_HD_PATH);
    }
    if let Some(material) = key {
        keyring.load_master_key(material)?;
    }
    keyring.deserialize(state);
    Ok(keyring)
}

fn inspect(config: KeyringConfig, path: &Path) -> Result<String> {
    let keyring = restore(config, read_state(path)?, None)?;
    let details = keyring.account_details();

    let mut out = String::new();
    writeln!(out, "hd path: {}", keyring.hd_path())?;
    writeln!(out, "bridge: {}", keyring.bridge_url())?;
    for account in keyring.get_accounts() {
        if let Some(detail) = details.get(&account) {
            let layout = if detail.bip44 { "ledger-live" } else { "legacy" };
            writeln!(out, "{}\t{}\t{}", account, detail.hd_path, layout)?;
        }
    }
    Ok(out)
}

fn migrate(config: KeyringConfig, path: &Path, key: &OptionalRootKeyArgs, output: Option<&Path>) -> Result<String> {
    let material = match (&key.public_key, &key.chain_code) {
        (Some(pk), Some(cc)) => Some(MasterKeyMaterial::from_hex(pk, cc)?),
        _ => None,
    };
    let state = read_state(path)?;
    let before = state.accounts.len();
    let keyring = restore(config, state, material.as_ref())?;
    let json = keyring.serialize().to_json_pretty()?;

    match output {
        Some(out_path) => {
            std::fs::write(out_path, &json).with_context(|| format!("writing {}", out_path.display()))?;
            Ok(format!(
                "migrated {} of {} account(s) to {}\n",
                keyring.get_accounts().len(),
                before,
                out_path.display()
            ))
        }
        None => Ok(format!("{}\n", json)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_command() {
        let cli = Cli::parse_from(["ledger-keyring", "path", "--index", "3", "--hd-path", "m/44'/60'/0'/0/0"]);
        assert_eq!(run(cli).unwrap(), "m/44'/60'/3'/0/0\n");
    }

    #[test]
    fn test_derive_refuses_ledger_live_root() {
        let cli = Cli::parse_from([
            "ledger-keyring",
            "derive",
            "--public-key",
            "00",
            "--chain-code",
            "00",
            "--hd-path",
            "m/44'/60'/0'/0/0",
        ]);
        assert!(run(cli).is_err());
    }

    #[test]
    fn test_migrate_requires_both_key_parts() {
        let parsed = Cli::try_parse_from(["ledger-keyring", "migrate", "--state", "s.json", "--public-key", "02"]);
        assert!(parsed.is_err());
    }
}
