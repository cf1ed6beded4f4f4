//! tests/bridge_lifecycle_tests.rs
//!
//! Channel readiness, deferred transport configuration, timeouts,
//! cancellation and connection events seen through the keyring.

mod util;

use ledger_bridge_keyring::bridge::{BridgeAction, BridgeTransport, MockLedgerBridge, TransportMode};
use ledger_bridge_keyring::{KeyringConfig, KeyringError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use util::{harness, harness_not_ready, legacy_config, TEST_SEED};

#[tokio::test]
async fn test_requests_fail_before_ready() {
    let h = harness_not_ready(legacy_config());
    assert_eq!(h.keyring.unlock(None, true).await, Err(KeyringError::ChannelNotReady));
    assert!(h.mock.requests().is_empty());
}

#[tokio::test]
async fn test_deferred_transport_mode_applies_after_ready() {
    let h = harness_not_ready(legacy_config());
    let keyring = Arc::new(h.keyring);

    let first = {
        let keyring = keyring.clone();
        tokio::spawn(async move { keyring.update_transport_method(TransportMode::U2f).await })
    };
    let second = {
        let keyring = keyring.clone();
        tokio::spawn(async move { keyring.update_transport_method(TransportMode::LedgerLive).await })
    };

    let transport = keyring.transport();
    while transport.deferred_transport_mode() != Some(TransportMode::LedgerLive) {
        tokio::task::yield_now().await;
    }
    // give the first caller a chance to register as well
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(h.mock.requests().is_empty());
    assert!(!first.is_finished());

    transport.mark_ready();
    assert_eq!(first.await.unwrap(), Ok(true));
    assert_eq!(second.await.unwrap(), Ok(true));

    let updates: Vec<_> = h
        .mock
        .requests()
        .into_iter()
        .filter(|r| r.action == BridgeAction::UpdateTransport)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].params["transportType"], "ledgerLive");
}

#[tokio::test]
async fn test_destroy_releases_deferred_transport_mode() {
    let h = harness_not_ready(legacy_config());
    let keyring = Arc::new(h.keyring);

    let waiting = {
        let keyring = keyring.clone();
        tokio::spawn(async move { keyring.update_transport_method(TransportMode::WebHid).await })
    };
    while keyring.transport().deferred_transport_mode().is_none() {
        tokio::task::yield_now().await;
    }

    keyring.destroy();
    let outcome = tokio::time::timeout(Duration::from_secs(2), waiting).await;
    assert_eq!(outcome.expect("caller released").unwrap(), Err(KeyringError::Cancelled));

    keyring.transport().mark_ready();
    assert_eq!(h.mock.request_count(BridgeAction::UpdateTransport), 0);
}

#[tokio::test]
async fn test_transport_update_rejected() {
    let h = harness(legacy_config());
    h.mock.set_reject_transport_update(true);
    assert_eq!(
        h.keyring.update_transport_method(TransportMode::WebHid).await,
        Err(KeyringError::TransportUpdateFailed)
    );
    h.mock.set_reject_transport_update(false);
    assert_eq!(h.keyring.update_transport_method(TransportMode::WebHid).await, Ok(true));
}

#[tokio::test(start_paused = true)]
async fn test_silent_bridge_times_out() {
    let h = harness(KeyringConfig { request_timeout_secs: 3, ..legacy_config() });
    h.mock.set_silent(BridgeAction::Unlock, true);

    let err = h.keyring.unlock(None, true).await.unwrap_err();
    assert_eq!(err, KeyringError::Timeout("ledger-unlock".to_string()));
    assert!(err.is_retryable());
    assert_eq!(h.keyring.transport().pending_count(), 0);

    h.mock.set_silent(BridgeAction::Unlock, false);
    assert!(h.keyring.unlock(None, true).await.is_ok());
}

#[tokio::test]
async fn test_destroy_cancels_pending_requests() {
    let h = harness(legacy_config());
    h.mock.set_silent(BridgeAction::MakeApp, true);
    let keyring = Arc::new(h.keyring);

    let pending = {
        let keyring = keyring.clone();
        tokio::spawn(async move { keyring.attempt_make_app().await })
    };
    while keyring.transport().pending_count() == 0 {
        tokio::task::yield_now().await;
    }

    keyring.destroy();
    assert_eq!(pending.await.unwrap(), Err(KeyringError::Cancelled));
    assert_eq!(keyring.transport().pending_count(), 0);
}

#[tokio::test]
async fn test_connection_events_reach_subscriber() {
    let h = harness(legacy_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.keyring.transport().on_connection_change(move |connected| sink.lock().push(connected));

    assert!(!h.keyring.is_connected());
    h.mock.emit_connection(true);
    assert!(h.keyring.is_connected());
    h.mock.emit_connection(false);
    assert!(!h.keyring.is_connected());
    assert_eq!(*seen.lock(), vec![true, false]);

    h.keyring.destroy();
    h.mock.emit_connection(true);
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test]
async fn test_replace_transport_after_bridge_url_change() {
    let h = harness(legacy_config());
    h.keyring.add_accounts(1).await.unwrap();

    assert!(h.keyring.set_bridge_url("https://bridge.example"));
    let mock = Arc::new(MockLedgerBridge::from_seed(&TEST_SEED).unwrap());
    let transport = BridgeTransport::with_timeout(mock.clone(), Some(Duration::from_secs(5)));
    mock.attach(&transport);
    transport.mark_ready();
    h.keyring.replace_transport(transport);

    let account = h.keyring.get_accounts().remove(0);
    h.keyring.sign_personal_message(&account, b"new channel").await.unwrap();
    assert_eq!(mock.request_count(BridgeAction::SignPersonalMessage), 1);
    assert_eq!(h.mock.request_count(BridgeAction::SignPersonalMessage), 0);
}
