//! Bridge transport
//!
//! Correlates requests and responses over an unordered channel. Every request
//! gets a fresh token; the pending waiter for that token is resolved exactly
//! once by `handle_inbound`, or removed by `cancel` / the request timeout.
//!
//! The channel itself is opaque: outbound messages go through
//! [`BridgeChannel::post_message`], inbound messages are pushed in by whoever
//! owns the channel via [`BridgeTransport::handle_inbound`]. The owner also
//! signals readiness once with [`BridgeTransport::mark_ready`].

use super::messages::{BridgeAction, BridgeRequest, BridgeResponse, TransportMode, BRIDGE_TARGET};
use crate::core::errors::{KeyringError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound half of the bridge channel.
pub trait BridgeChannel: Send + Sync {
    fn post_message(&self, request: &BridgeRequest) -> Result<()>;
}

type ConnectionHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Transport mode requested before the channel was ready.
struct DeferredConfig {
    mode: TransportMode,
    waiters: Vec<oneshot::Sender<Result<bool>>>,
    /// Runtime of the most recent caller; readiness may be signalled off-runtime.
    runtime: Option<Handle>,
}

#[derive(Default)]
struct ChannelState {
    ready: bool,
    device_connected: bool,
    deferred: Option<DeferredConfig>,
}

struct Inner {
    channel: Arc<dyn BridgeChannel>,
    pending: Mutex<HashMap<String, oneshot::Sender<BridgeResponse>>>,
    state: Mutex<ChannelState>,
    on_connection: Mutex<Option<ConnectionHandler>>,
    timeout: Option<Duration>,
}

/// Cloneable handle to a bridge transport.
#[derive(Clone)]
pub struct BridgeTransport {
    inner: Arc<Inner>,
}

/// Non-owning handle, for channels that need to reply into the transport.
#[derive(Clone)]
pub struct WeakBridgeTransport {
    inner: Weak<Inner>,
}

impl WeakBridgeTransport {
    pub fn upgrade(&self) -> Option<BridgeTransport> {
        self.inner.upgrade().map(|inner| BridgeTransport { inner })
    }
}

impl BridgeTransport {
    pub fn new(channel: Arc<dyn BridgeChannel>) -> Self {
        Self::with_timeout(channel, None)
    }

    /// `timeout` bounds every `request`; `None` waits indefinitely.
    pub fn with_timeout(channel: Arc<dyn BridgeChannel>, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                pending: Mutex::new(HashMap::new()),
                state: Mutex::new(ChannelState::default()),
                on_connection: Mutex::new(None),
                timeout,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakBridgeTransport {
        WeakBridgeTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    pub fn is_device_connected(&self) -> bool {
        self.inner.state.lock().device_connected
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Posts a request and returns its token with the response receiver.
    pub fn send(&self, action: BridgeAction, params: Value) -> Result<(String, oneshot::Receiver<BridgeResponse>)> {
        if !self.is_ready() {
            return Err(KeyringError::ChannelNotReady);
        }

        let token = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(token.clone(), tx);

        let request = BridgeRequest {
            action,
            params,
            message_id: token.clone(),
            target: BRIDGE_TARGET.to_string(),
        };
        debug!("bridge -> {} ({})", action, token);

        if let Err(e) = self.inner.channel.post_message(&request) {
            self.inner.pending.lock().remove(&token);
            return Err(e);
        }

        Ok((token, rx))
    }

    /// Sends and waits for the matching response.
    pub async fn request(&self, action: BridgeAction, params: Value) -> Result<BridgeResponse> {
        let (token, rx) = self.send(action, params)?;

        let outcome = match self.inner.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.cancel(&token);
                    warn!("bridge request {} ({}) timed out after {:?}", action, token, limit);
                    return Err(KeyringError::Timeout(action.to_string()));
                }
            },
            None => rx.await,
        };

        outcome.map_err(|_| KeyringError::Cancelled)
    }

    /// Drops the pending waiter for `token`. Its caller observes `Cancelled`.
    pub fn cancel(&self, token: &str) -> bool {
        self.inner.pending.lock().remove(token).is_some()
    }

    /// Cancels every pending request and any transport mode still waiting
    /// for readiness.
    pub fn cancel_all(&self) -> usize {
        let mut count = {
            let mut pending = self.inner.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };

        let deferred = self.inner.state.lock().deferred.take();
        if let Some(deferred) = deferred {
            count += deferred.waiters.len();
            for waiter in deferred.waiters {
                let _ = waiter.send(Err(KeyringError::Cancelled));
            }
        }
        count
    }

    /// Dispatches one inbound message.
    pub fn handle_inbound(&self, response: BridgeResponse) {
        if let Some(token) = response.message_id.clone() {
            let waiter = self.inner.pending.lock().remove(&token);
            if let Some(waiter) = waiter {
                debug!("bridge <- {:?} ({})", response.action, token);
                if waiter.send(response).is_err() {
                    debug!("caller for {} went away before the response arrived", token);
                }
                return;
            }
        }

        if let Some(connected) = response.connection_state() {
            self.inner.state.lock().device_connected = connected;
            info!("Ledger device {}", if connected { "connected" } else { "disconnected" });
            let handler = self.inner.on_connection.lock().clone();
            if let Some(handler) = handler {
                handler(connected);
            }
            return;
        }

        debug!("dropping unmatched bridge message: {:?}", response.action);
    }

    /// Parses and dispatches a raw JSON message.
    pub fn handle_inbound_json(&self, raw: &str) -> Result<()> {
        let response: BridgeResponse = serde_json::from_str(raw)?;
        self.handle_inbound(response);
        Ok(())
    }

    /// Registers the connection-change handler, replacing any previous one.
    pub fn on_connection_change<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.inner.on_connection.lock() = Some(Arc::new(handler));
    }

    pub fn clear_connection_handler(&self) {
        *self.inner.on_connection.lock() = None;
    }

    /// One-time readiness transition. Replays a deferred transport mode in a
    /// task on the runtime that deferred it; repeated calls are no-ops. Safe to
    /// call from a thread outside any runtime.
    pub fn mark_ready(&self) {
        let deferred = {
            let mut state = self.inner.state.lock();
            if state.ready {
                debug!("duplicate bridge readiness signal ignored");
                return;
            }
            state.ready = true;
            state.deferred.take()
        };
        info!("Ledger bridge ready");

        let Some(DeferredConfig { mode, waiters, runtime }) = deferred else {
            return;
        };
        match runtime.or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                let transport = self.clone();
                runtime.spawn(async move {
                    let result = transport.apply_transport_mode(mode).await;
                    for waiter in waiters {
                        let _ = waiter.send(result.clone());
                    }
                });
            }
            None => {
                warn!("no async runtime to apply transport mode {:?}", mode);
                for waiter in waiters {
                    let _ = waiter.send(Err(KeyringError::TransportUpdateFailed));
                }
            }
        }
    }

    /// Applies a transport mode now, or once the channel becomes ready.
    /// Only the last mode requested before readiness is applied; every
    /// caller waiting on it receives the outcome of that apply.
    pub async fn configure_transport_mode(&self, mode: TransportMode) -> Result<bool> {
        let deferred_rx = {
            let mut state = self.inner.state.lock();
            if state.ready {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let runtime = Handle::try_current().ok();
                match state.deferred.as_mut() {
                    Some(deferred) => {
                        deferred.mode = mode;
                        deferred.waiters.push(tx);
                        if runtime.is_some() {
                            deferred.runtime = runtime;
                        }
                    }
                    None => {
                        state.deferred = Some(DeferredConfig {
                            mode,
                            waiters: vec![tx],
                            runtime,
                        });
                    }
                }
                Some(rx)
            }
        };

        match deferred_rx {
            None => self.apply_transport_mode(mode).await,
            Some(rx) => {
                debug!("bridge not ready, deferring transport mode {:?}", mode);
                rx.await.map_err(|_| KeyringError::Cancelled)?
            }
        }
    }

    /// Mode waiting for readiness, if any.
    pub fn deferred_transport_mode(&self) -> Option<TransportMode> {
        self.inner.state.lock().deferred.as_ref().map(|d| d.mode)
    }

    async fn apply_transport_mode(&self, mode: TransportMode) -> Result<bool> {
        let response = self
            .request(BridgeAction::UpdateTransport, json!({ "transportType": mode }))
            .await?;
        if response.success {
            info!("Ledger transport updated to {:?}", mode);
            Ok(true)
        } else {
            Err(KeyringError::TransportUpdateFailed)
        }
    }
}

impl std::fmt::Debug for BridgeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeTransport")
            .field("ready", &self.is_ready())
            .field("device_connected", &self.is_device_connected())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records outbound requests without answering them.
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<BridgeRequest>>,
        fail: AtomicBool,
    }

    impl BridgeChannel for RecordingChannel {
        fn post_message(&self, request: &BridgeRequest) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(KeyringError::Bridge("frame gone".to_string()));
            }
            self.sent.lock().push(request.clone());
            Ok(())
        }
    }

    fn transport() -> (Arc<RecordingChannel>, BridgeTransport) {
        let channel = Arc::new(RecordingChannel::default());
        let transport = BridgeTransport::new(channel.clone());
        (channel, transport)
    }

    #[test]
    fn test_send_before_ready_fails() {
        let (channel, transport) = transport();
        let err = transport.send(BridgeAction::Unlock, json!({})).unwrap_err();
        assert_eq!(err, KeyringError::ChannelNotReady);
        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_tokens_are_unique_and_dispatched_once() {
        let (channel, transport) = transport();
        transport.mark_ready();

        let (t1, rx1) = transport.send(BridgeAction::Unlock, json!({})).unwrap();
        let (t2, rx2) = transport.send(BridgeAction::MakeApp, json!({})).unwrap();
        assert_ne!(t1, t2);
        assert_eq!(transport.pending_count(), 2);
        assert_eq!(channel.sent.lock()[0].target, BRIDGE_TARGET);

        // Out of order: the second request is answered first.
        transport.handle_inbound(BridgeResponse::success(&t2, BridgeAction::MakeApp, json!({})));
        transport.handle_inbound(BridgeResponse::success(&t1, BridgeAction::Unlock, json!({ "address": "0x1" })));
        // Duplicate delivery is dropped.
        transport.handle_inbound(BridgeResponse::success(&t1, BridgeAction::Unlock, json!({ "address": "0x2" })));

        assert_eq!(rx1.await.unwrap().payload["address"], "0x1");
        assert!(rx2.await.unwrap().success);
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn test_post_failure_removes_pending() {
        let (channel, transport) = transport();
        transport.mark_ready();
        channel.fail.store(true, Ordering::SeqCst);
        assert!(transport.send(BridgeAction::Unlock, json!({})).is_err());
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_resolves_waiter_with_cancelled() {
        let (channel, transport) = transport();
        transport.mark_ready();

        let waiting = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request(BridgeAction::Unlock, json!({})).await })
        };
        tokio::task::yield_now().await;
        while channel.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        let token = channel.sent.lock()[0].message_id.clone();
        assert!(transport.cancel(&token));
        assert!(!transport.cancel(&token));
        assert_eq!(waiting.await.unwrap(), Err(KeyringError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_cleans_up() {
        let channel = Arc::new(RecordingChannel::default());
        let transport = BridgeTransport::with_timeout(channel, Some(Duration::from_secs(5)));
        transport.mark_ready();

        let err = transport.request(BridgeAction::Unlock, json!({})).await.unwrap_err();
        assert!(matches!(err, KeyringError::Timeout(_)));
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn test_connection_events_update_state_and_notify() {
        let (_channel, transport) = transport();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport.on_connection_change(move |connected| sink.lock().push(connected));

        transport.handle_inbound(BridgeResponse::connection_event(true));
        assert!(transport.is_device_connected());
        transport.handle_inbound(BridgeResponse::connection_event(false));
        assert!(!transport.is_device_connected());
        assert_eq!(*seen.lock(), vec![true, false]);

        transport.clear_connection_handler();
        transport.handle_inbound(BridgeResponse::connection_event(true));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_unmatched_message_is_dropped() {
        let (_channel, transport) = transport();
        transport.handle_inbound(BridgeResponse::success("nobody", BridgeAction::Unlock, json!({})));
        transport
            .handle_inbound_json(r#"{"action":"ledger-unlock","messageId":"ghost","success":true}"#)
            .unwrap();
        assert!(!transport.is_device_connected());
        assert!(transport.handle_inbound_json("not json").is_err());
    }

    #[tokio::test]
    async fn test_ready_is_idempotent() {
        let (_channel, transport) = transport();
        transport.mark_ready();
        transport.mark_ready();
        assert!(transport.is_ready());
    }

    #[tokio::test]
    async fn test_deferred_transport_mode_last_wins() {
        let (channel, transport) = transport();

        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.configure_transport_mode(TransportMode::U2f).await })
        };
        let second = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.configure_transport_mode(TransportMode::WebHid).await })
        };
        while transport.deferred_transport_mode() != Some(TransportMode::WebHid)
            || !first_and_second_registered(&transport)
        {
            tokio::task::yield_now().await;
        }
        assert!(channel.sent.lock().is_empty());
        assert!(!first.is_finished());

        transport.mark_ready();
        while channel.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        let sent = channel.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].action, BridgeAction::UpdateTransport);
        assert_eq!(sent[0].params["transportType"], "webhid");

        transport.handle_inbound(BridgeResponse::success(
            &sent[0].message_id,
            BridgeAction::UpdateTransport,
            json!({}),
        ));
        assert_eq!(first.await.unwrap(), Ok(true));
        assert_eq!(second.await.unwrap(), Ok(true));
    }

    fn first_and_second_registered(transport: &BridgeTransport) -> bool {
        transport
            .inner
            .state
            .lock()
            .deferred
            .as_ref()
            .map_or(false, |d| d.waiters.len() == 2)
    }

    #[test]
    fn test_ready_signalled_from_foreign_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let (channel, transport) = transport();

        let pending = {
            let transport = transport.clone();
            runtime.spawn(async move { transport.configure_transport_mode(TransportMode::U2f).await })
        };
        while transport.deferred_transport_mode().is_none() {
            std::thread::yield_now();
        }

        let pump = transport.clone();
        std::thread::spawn(move || pump.mark_ready()).join().unwrap();
        while channel.sent.lock().is_empty() {
            std::thread::yield_now();
        }

        let token = channel.sent.lock()[0].message_id.clone();
        transport.handle_inbound(BridgeResponse::success(&token, BridgeAction::UpdateTransport, json!({})));
        assert_eq!(runtime.block_on(pending).unwrap(), Ok(true));
    }

    #[tokio::test]
    async fn test_cancel_all_releases_deferred_waiters() {
        let (channel, transport) = transport();

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.configure_transport_mode(TransportMode::WebHid).await })
        };
        while transport.deferred_transport_mode().is_none() {
            tokio::task::yield_now().await;
        }

        assert_eq!(transport.cancel_all(), 1);
        assert_eq!(pending.await.unwrap(), Err(KeyringError::Cancelled));
        assert_eq!(transport.deferred_transport_mode(), None);

        transport.mark_ready();
        assert!(channel.sent.lock().is_empty());
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let (_channel, transport) = transport();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let weak = transport.downgrade();
        transport.on_connection_change(move |_| {
            *counter.lock() += 1;
            if let Some(transport) = weak.upgrade() {
                transport.clear_connection_handler();
            }
        });

        transport.handle_inbound(BridgeResponse::connection_event(true));
        transport.handle_inbound(BridgeResponse::connection_event(false));
        assert_eq!(*calls.lock(), 1);
        assert!(!transport.is_device_connected());
    }

    #[tokio::test]
    async fn test_transport_mode_rejection_when_ready() {
        let (channel, transport) = transport();
        transport.mark_ready();

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.configure_transport_mode(TransportMode::U2f).await })
        };
        while channel.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let token = channel.sent.lock()[0].message_id.clone();
        transport.handle_inbound(BridgeResponse::failure(&token, BridgeAction::UpdateTransport, "nope"));
        assert_eq!(pending.await.unwrap(), Err(KeyringError::TransportUpdateFailed));
    }
}
