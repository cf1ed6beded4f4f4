//! Bridge protocol: wire messages, the correlated transport and a simulated
//! device for tests and demos.

pub mod messages;
pub mod mock;
pub mod transport;

pub use messages::{BridgeAction, BridgeRequest, BridgeResponse, TransportMode};
pub use mock::MockLedgerBridge;
pub use transport::{BridgeChannel, BridgeTransport};
