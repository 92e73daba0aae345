//! # vox-upstream
//!
//! The upstream half of the relay: one outbound connection to the realtime
//! speech service per client session.
//!
//! - [`UpstreamBridge`]: owns the connection, performs the handshake,
//!   translates outbound audio/control frames and decodes inbound deltas
//! - [`transport`]: the connector/sink/stream seam; [`RealtimeConnector`]
//!   is the production `tokio-tungstenite` implementation
//! - [`mock`]: recording mock endpoint for tests

#![deny(unsafe_code)]

pub mod bridge;
pub mod error;
pub mod mock;
pub mod transport;

pub use bridge::{BridgeConfig, BridgeEvent, UpstreamBridge};
pub use error::UpstreamError;
pub use transport::{RealtimeConnector, UpstreamConnector, UpstreamSink, UpstreamStream};
