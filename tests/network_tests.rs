//! tests/network_tests.rs
//!
//! Etherscan history lookups against a mocked HTTP server.

use httpmock::{Method, MockServer};
use ledger_bridge_keyring::chain::{EtherscanClient, TransactionHistory};
use ledger_bridge_keyring::KeyringError;
use serde_json::json;

const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

#[tokio::test(flavor = "current_thread")]
async fn test_address_with_history() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(Method::GET)
            .path("/api")
            .query_param("module", "account")
            .query_param("action", "txlist")
            .query_param("address", ADDRESS)
            .query_param("page", "1")
            .query_param("offset", "1")
            .query_param("apikey", "secret");
        then.status(200).json_body(json!({
            "status": "1",
            "message": "OK",
            "result": [{ "hash": "0xabc" }]
        }));
    });

    let client = EtherscanClient::with_base_url(server.base_url()).with_api_key(Some("secret".into()));
    assert!(client.has_previous_transactions(ADDRESS).await.unwrap());
    mock.assert();
}

#[tokio::test(flavor = "current_thread")]
async fn test_address_without_history() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::GET).path("/api");
        then.status(200).json_body(json!({
            "status": "0",
            "message": "No transactions found",
            "result": []
        }));
    });

    let client = EtherscanClient::with_base_url(server.base_url());
    assert!(!client.has_previous_transactions(ADDRESS).await.unwrap());
}

#[tokio::test(flavor = "current_thread")]
async fn test_rate_limited_response_counts_as_unused() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::GET).path("/api");
        then.status(200).json_body(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached"
        }));
    });

    let client = EtherscanClient::with_base_url(server.base_url());
    assert!(!client.has_previous_transactions(ADDRESS).await.unwrap());
}

#[tokio::test(flavor = "current_thread")]
async fn test_garbage_body_is_chain_data_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(Method::GET).path("/api");
        then.status(502).body("bad gateway");
    });

    let client = EtherscanClient::with_base_url(server.base_url());
    let err = client.has_previous_transactions(ADDRESS).await.unwrap_err();
    assert!(matches!(err, KeyringError::ChainData(_)));
    assert!(err.is_retryable());
}
