//! Upstream bridge error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from the upstream bridge.
///
/// All of these are terminal for the session that hit them: the relay never
/// retries an upstream handshake and never reconnects mid-session.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No credential was configured. Raised synchronously, before any
    /// network attempt.
    #[error("upstream credential is not configured")]
    MissingCredential,
    /// `open()` was called on a bridge that is already open.
    #[error("bridge is already open")]
    AlreadyOpen,
    /// The upstream URL or headers could not be assembled.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
    /// The connection attempt failed (network error, rejected credential).
    #[error("upstream connect failed: {0}")]
    Connect(String),
    /// Connect + handshake exceeded the configured bound.
    #[error("upstream handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// An outbound frame could not be transmitted.
    #[error("upstream send failed: {0}")]
    Send(String),
    /// An inbound frame could not be read.
    #[error("upstream receive failed: {0}")]
    Receive(String),
}

impl UpstreamError {
    /// Short classification string for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::AlreadyOpen => "already_open",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Connect(_) => "connect",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::Send(_) => "send",
            Self::Receive(_) => "receive",
        }
    }
}
