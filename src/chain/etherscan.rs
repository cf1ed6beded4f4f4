//! Etherscan API client
//!
//! Only the `txlist` endpoint is used: one row is enough to tell whether an
//! address has history.

use super::TransactionHistory;
use crate::core::errors::{KeyringError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Networks with an Etherscan deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Sepolia,
    Goerli,
}

impl Network {
    /// Unknown names fall back to mainnet.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "sepolia" => Network::Sepolia,
            "goerli" => Network::Goerli,
            _ => Network::Mainnet,
        }
    }

    pub fn api_base_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.etherscan.io",
            Network::Sepolia => "https://api-sepolia.etherscan.io",
            Network::Goerli => "https://api-goerli.etherscan.io",
        }
    }
}

/// Etherscan API response
#[derive(Debug, Deserialize)]
struct TxListResponse {
    status: String,
    #[serde(default)]
    result: Value,
}

pub struct EtherscanClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl EtherscanClient {
    pub fn new(network: Network) -> Self {
        Self::with_base_url(network.api_base_url())
    }

    /// Points the client at any Etherscan-compatible host.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn txlist_url(&self, address: &str) -> String {
        let mut url = format!(
            "{}/api?module=account&action=txlist&address={}&tag=latest&page=1&offset=1",
            self.base_url, address
        );
        if let Some(key) = &self.api_key {
            url.push_str("&apikey=");
            url.push_str(key);
        }
        url
    }
}

#[async_trait]
impl TransactionHistory for EtherscanClient {
    async fn has_previous_transactions(&self, address: &str) -> Result<bool> {
        let response: TxListResponse = self
            .client
            .get(self.txlist_url(address))
            .send()
            .await
            .map_err(|e| KeyringError::ChainData(e.to_string()))?
            .json()
            .await
            .map_err(|e| KeyringError::ChainData(e.to_string()))?;

        let used = response.status != "0"
            && response.result.as_array().map_or(false, |rows| !rows.is_empty());
        debug!("history lookup for {}: {}", address, used);
        Ok(used)
    }
}
