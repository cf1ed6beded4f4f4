// tests/util.rs
// Shared helpers for keyring integration tests

#![allow(dead_code)]

use ledger_bridge_keyring::bridge::{BridgeTransport, MockLedgerBridge};
use ledger_bridge_keyring::chain::StaticTransactionHistory;
use ledger_bridge_keyring::core::paths::LEDGER_LIVE_HD_PATH;
use ledger_bridge_keyring::{KeyringConfig, LedgerBridgeKeyring};
use std::sync::Arc;

/// Deterministic device seed used across tests.
pub const TEST_SEED: [u8; 32] = [0x11; 32];

pub struct Harness {
    pub mock: Arc<MockLedgerBridge>,
    pub history: Arc<StaticTransactionHistory>,
    pub keyring: LedgerBridgeKeyring,
}

/// Keyring wired to a simulated device, channel already ready.
pub fn harness(config: KeyringConfig) -> Harness {
    let harness = harness_not_ready(config);
    harness.keyring.transport().mark_ready();
    harness
}

/// Keyring wired to a simulated device whose channel has not signalled
/// readiness yet.
pub fn harness_not_ready(config: KeyringConfig) -> Harness {
    let mock = Arc::new(MockLedgerBridge::from_seed(&TEST_SEED).expect("seed"));
    let history = Arc::new(StaticTransactionHistory::default());
    let transport = BridgeTransport::with_timeout(mock.clone(), config.request_timeout());
    let keyring = LedgerBridgeKeyring::with_transport(transport, config, history.clone());
    mock.attach(&keyring.transport());
    Harness { mock, history, keyring }
}

pub fn legacy_config() -> KeyringConfig {
    KeyringConfig::default()
}

pub fn ledger_live_config() -> KeyringConfig {
    KeyringConfig {
        hd_path: LEDGER_LIVE_HD_PATH.to_string(),
        ..KeyringConfig::default()
    }
}
