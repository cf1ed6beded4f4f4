//! Bridge wire messages
//!
//! Outbound: `{ action, params, messageId, target }`
//! Inbound:  `{ success, action, messageId, payload }`
//! Unsolicited connection events carry no `messageId`.

use crate::core::errors::{KeyringError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Fixed channel identifier the bridge filters on.
pub const BRIDGE_TARGET: &str = "LEDGER-IFRAME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeAction {
    #[serde(rename = "ledger-unlock")]
    Unlock,
    #[serde(rename = "ledger-make-app")]
    MakeApp,
    #[serde(rename = "ledger-update-transport")]
    UpdateTransport,
    #[serde(rename = "ledger-sign-transaction")]
    SignTransaction,
    #[serde(rename = "ledger-sign-personal-message")]
    SignPersonalMessage,
    #[serde(rename = "ledger-sign-typed-data")]
    SignTypedData,
    #[serde(rename = "ledger-connection-change")]
    ConnectionChange,
}

impl BridgeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeAction::Unlock => "ledger-unlock",
            BridgeAction::MakeApp => "ledger-make-app",
            BridgeAction::UpdateTransport => "ledger-update-transport",
            BridgeAction::SignTransaction => "ledger-sign-transaction",
            BridgeAction::SignPersonalMessage => "ledger-sign-personal-message",
            BridgeAction::SignTypedData => "ledger-sign-typed-data",
            BridgeAction::ConnectionChange => "ledger-connection-change",
        }
    }
}

impl fmt::Display for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the bridge talks to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    #[serde(rename = "u2f")]
    U2f,
    #[serde(rename = "webhid")]
    WebHid,
    #[serde(rename = "ledgerLive")]
    LedgerLive,
}

impl std::str::FromStr for TransportMode {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "u2f" => Ok(TransportMode::U2f),
            "webhid" => Ok(TransportMode::WebHid),
            "ledgerLive" | "ledger-live" => Ok(TransportMode::LedgerLive),
            other => Err(KeyringError::Config(format!("unknown transport mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub action: BridgeAction,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BridgeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl BridgeResponse {
    pub fn success(message_id: &str, action: BridgeAction, payload: Value) -> Self {
        Self {
            success: true,
            action: Some(action.as_str().to_string()),
            message_id: Some(message_id.to_string()),
            payload,
        }
    }

    pub fn failure(message_id: &str, action: BridgeAction, error: &str) -> Self {
        Self {
            success: false,
            action: Some(action.as_str().to_string()),
            message_id: Some(message_id.to_string()),
            payload: serde_json::json!({ "error": error }),
        }
    }

    pub fn connection_event(connected: bool) -> Self {
        Self {
            success: true,
            action: Some(BridgeAction::ConnectionChange.as_str().to_string()),
            message_id: None,
            payload: serde_json::json!({ "connected": connected }),
        }
    }

    /// `Some(connected)` when this is an unsolicited connection-change event.
    pub fn connection_state(&self) -> Option<bool> {
        if self.action.as_deref() != Some(BridgeAction::ConnectionChange.as_str()) {
            return None;
        }
        self.payload.get("connected").and_then(Value::as_bool)
    }

    /// Error carried by a failed response: a string, or an object with `message`.
    pub fn error_message(&self) -> Option<String> {
        match self.payload.get("error")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    /// Converts a failure into the forwarded bridge error, or `fallback`.
    pub fn into_error(self, fallback: KeyringError) -> KeyringError {
        self.error_message().map(KeyringError::Bridge).unwrap_or(fallback)
    }

    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| KeyringError::MalformedResponse(e.to_string()))
    }
}

/// Successful unlock payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockPayload {
    pub address: String,
    #[serde(rename = "publicKey", default)]
    pub public_key: Option<String>,
    #[serde(rename = "chainCode", default)]
    pub chain_code: Option<String>,
}

/// Recovery value as sent by the bridge: a JSON number for messages, a hex
/// string for transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRecoveryValue {
    Number(u64),
    Text(String),
}

/// Successful signing payload, still loosely typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePayload {
    pub r: String,
    pub s: String,
    pub v: RawRecoveryValue,
}
