//! On-chain data used by account discovery.

use crate::core::errors::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

pub mod etherscan;

pub use etherscan::{EtherscanClient, Network};

/// Whether an address has been used on chain.
#[async_trait]
pub trait TransactionHistory: Send + Sync {
    async fn has_previous_transactions(&self, address: &str) -> Result<bool>;
}

/// In-memory history: addresses listed as used have history, others do not.
#[derive(Debug, Default)]
pub struct StaticTransactionHistory {
    used: Mutex<HashSet<String>>,
    lookups: Mutex<Vec<String>>,
}

impl StaticTransactionHistory {
    pub fn new<I, S>(used: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            used: Mutex::new(used.into_iter().map(|a| a.as_ref().to_lowercase()).collect()),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn mark_used(&self, address: &str) {
        self.used.lock().insert(address.to_lowercase());
    }

    /// Addresses looked up so far, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl TransactionHistory for StaticTransactionHistory {
    async fn has_previous_transactions(&self, address: &str) -> Result<bool> {
        self.lookups.lock().push(address.to_string());
        Ok(self.used.lock().contains(&address.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_history_is_case_insensitive() {
        let history = StaticTransactionHistory::new(["0xABCdef0000000000000000000000000000000001"]);
        assert!(history
            .has_previous_transactions("0xabcdef0000000000000000000000000000000001")
            .await
            .unwrap());
        assert!(!history
            .has_previous_transactions("0x0000000000000000000000000000000000000002")
            .await
            .unwrap());
        assert_eq!(history.lookups().len(), 2);
    }
}
