pub mod accounts;
pub mod config;
pub mod derivation;
pub mod errors;
pub mod paths;

pub use accounts::{AccountDetails, AccountPageEntry, AccountStore};
pub use config::KeyringConfig;
pub use errors::{KeyringError, Result};
pub use paths::HdPathPolicy;
