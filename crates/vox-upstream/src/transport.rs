//! Upstream transport seam.
//!
//! The bridge talks to the speech service through three small traits so the
//! production connector (`tokio-tungstenite`) can be swapped for the
//! recording mock in tests. One connector produces one sink/stream pair per
//! connection; the pair is owned by exactly one bridge.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::UpstreamError;

/// Protocol-version header required by the realtime endpoint.
const PROTOCOL_VERSION_HEADER: &str = "OpenAI-Beta";

/// Protocol-version header value.
const PROTOCOL_VERSION: &str = "realtime=v1";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of an upstream connection.
#[async_trait]
pub trait UpstreamSink: Send {
    /// Transmit one text frame.
    async fn send(&mut self, frame: String) -> Result<(), UpstreamError>;
    /// Close the connection from the write side.
    async fn close(&mut self) -> Result<(), UpstreamError>;
}

/// Read half of an upstream connection.
#[async_trait]
pub trait UpstreamStream: Send {
    /// Next text frame. `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<Result<String, UpstreamError>>;
}

/// Opens upstream connections.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open one connection authenticated with `credential` as a bearer token.
    async fn connect(
        &self,
        credential: &str,
    ) -> Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamStream>), UpstreamError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Production connector
// ─────────────────────────────────────────────────────────────────────────────

/// `tokio-tungstenite` connector for the realtime speech endpoint.
pub struct RealtimeConnector {
    url: String,
}

impl RealtimeConnector {
    /// Build a connector for `base_url` with the given model identifier.
    #[must_use]
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            url: format!("{base_url}?model={model}"),
        }
    }

    /// The full upstream URL including the model query parameter.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl UpstreamConnector for RealtimeConnector {
    async fn connect(
        &self,
        credential: &str,
    ) -> Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamStream>), UpstreamError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        let _ = request.headers_mut().insert(AUTHORIZATION, bearer);
        let _ = request.headers_mut().insert(
            PROTOCOL_VERSION_HEADER,
            HeaderValue::from_static(PROTOCOL_VERSION),
        );

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;
        debug!(url = %self.url, "upstream connection established");

        let (sink, stream) = ws.split();
        Ok((
            Box::new(RealtimeSink { sink }),
            Box::new(RealtimeStream { stream }),
        ))
    }
}

struct RealtimeSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl UpstreamSink for RealtimeSink {
    async fn send(&mut self, frame: String) -> Result<(), UpstreamError> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| UpstreamError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        self.sink
            .close()
            .await
            .map_err(|e| UpstreamError::Send(e.to_string()))
    }
}

struct RealtimeStream {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl UpstreamStream for RealtimeStream {
    async fn next_frame(&mut self) -> Option<Result<String, UpstreamError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    // Some peers frame JSON as binary; accept it if valid UTF-8.
                    match std::str::from_utf8(&data) {
                        Ok(s) => return Some(Ok(s.to_owned())),
                        Err(_) => {
                            debug!(len = data.len(), "dropping non-UTF8 binary upstream frame");
                        }
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {} // Ping/Pong handled by the protocol layer
                Err(e) => return Some(Err(UpstreamError::Receive(e.to_string()))),
            }
        }
    }
}
