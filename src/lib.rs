// src/lib.rs
//! Ledger hardware-wallet keyring.
//!
//! Derives Ethereum accounts, tracks which of them are active and delegates
//! every private-key operation to a device reached through a message bridge,
//! verifying each signature it returns.

pub mod bridge;
pub mod chain;
pub mod cli;
pub mod core;
pub mod keyring;

pub use crate::bridge::{BridgeChannel, BridgeTransport, MockLedgerBridge, TransportMode};
pub use crate::core::{KeyringConfig, KeyringError, Result};
pub use crate::keyring::{LedgerBridgeKeyring, SerializedKeyring, UnlockOutcome, KEYRING_TYPE};
