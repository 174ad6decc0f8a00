//! Resilient WebSocket price stream client.
//!
//! Keeps a live price feed flowing into the shared cache across network
//! trouble: exponential-backoff reconnects with a bounded attempt
//! budget, full subscription replay on every new session, heartbeat
//! supervision, and silent dropping of malformed frames.

pub mod client;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscriptions;
pub mod transport;

pub use client::{ConnectionState, StreamClient, StreamConfig, StreamEvent};
pub use error::{StreamError, StreamResult};
pub use message::{ErrorPayload, PriceUpdatePayload, SymbolList, WireMessage};
pub use subscriptions::SubscriptionSet;
pub use transport::{
    BoxFuture, Channel, ChannelEvent, Connector, MockConnector, MockSessionHandle, WsConnector,
};
