//! Keyring error types.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KeyringError>;

/// Errors surfaced by keyring, transport and derivation operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    /// The bridge channel has not signalled readiness yet.
    #[error("Bridge channel is not ready")]
    ChannelNotReady,

    /// Address could not be matched to a derivation index.
    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    /// Address is not part of this keyring.
    #[error("Account for address '{0}' not found")]
    AccountNotFound(String),

    /// Local derivation attempted before the root key was unlocked.
    #[error("Keyring is not unlocked")]
    NotUnlocked,

    /// The connected device derives a different address for the stored path.
    #[error("Account {0} does not belong to the connected device")]
    ForeignAccount(String),

    /// Recovered signer differs from the requested account.
    #[error("The signature doesn't match the right address")]
    AddressMismatch,

    /// Reconstructed transaction signature failed verification.
    #[error("The transaction signature is not valid")]
    InvalidSignature,

    /// Typed data signing requested with a version other than V4.
    #[error("Only version 4 of typed data signing is supported, got {0}")]
    UnsupportedVersion(String),

    /// Error payload forwarded verbatim from the bridge.
    #[error("{0}")]
    Bridge(String),

    /// Bridge reported failure without an error payload.
    #[error("Unknown error")]
    UnknownChannelError,

    /// Bridge refused the transport update.
    #[error("Ledger transport could not be updated")]
    TransportUpdateFailed,

    /// No response arrived within the configured timeout.
    #[error("Bridge request timed out: {0}")]
    Timeout(String),

    /// Pending request was cancelled before a response arrived.
    #[error("Bridge request cancelled")]
    Cancelled,

    /// Response payload could not be decoded.
    #[error("Malformed bridge response: {0}")]
    MalformedResponse(String),

    /// Derivation path could not be parsed.
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    /// Child key derivation failed.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Address string is not a valid 20-byte hex address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Chain data lookup failed.
    #[error("Chain data error: {0}")]
    ChainData(String),

    /// State (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation the device cannot perform.
    #[error("Not supported on this device: {0}")]
    NotSupported(String),
}

impl KeyringError {
    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeyringError::ChannelNotReady | KeyringError::Timeout(_) | KeyringError::ChainData(_)
        )
    }

    /// Whether the bridge returned a signature that failed verification.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            KeyringError::AddressMismatch
                | KeyringError::InvalidSignature
                | KeyringError::ForeignAccount(_)
        )
    }
}

impl From<serde_json::Error> for KeyringError {
    fn from(err: serde_json::Error) -> Self {
        KeyringError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for KeyringError {
    fn from(err: hex::FromHexError) -> Self {
        KeyringError::MalformedResponse(err.to_string())
    }
}
