//! The upstream bridge: one outbound realtime connection per client session.
//!
//! Lifecycle: constructed when a client connects, `open()`ed once, then
//! driven by the session task until either side closes. The bridge owns its
//! connection exclusively — nothing is shared between sessions except the
//! immutable credential.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vox_core::protocol::{SessionParams, UpstreamCommand, UpstreamEvent, decode_upstream_frame};

use crate::error::UpstreamError;
use crate::transport::{UpstreamConnector, UpstreamSink, UpstreamStream};

/// Bridge construction parameters, fixed for the bridge's lifetime.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Voice and behavior parameters sent in the handshake.
    pub session: SessionParams,
    /// Bound on connect + handshake-send.
    pub handshake_timeout: Duration,
    /// Capacity of the event channel returned by [`UpstreamBridge::open`].
    pub event_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session: SessionParams {
                voice: "alloy".to_string(),
                instructions: "Understand any spoken language and respond naturally in the same \
                               language using conversational voice."
                    .to_string(),
            },
            handshake_timeout: Duration::from_secs(10),
            event_buffer_size: 256,
        }
    }
}

/// An event produced by the upstream connection, in strict arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    /// One base64 chunk of synthesized audio.
    AudioDelta(String),
    /// One chunk of response text.
    TextDelta(String),
    /// The upstream side closed; no further events will arrive.
    Closed,
}

/// One outbound connection to the speech service, scoped to one session.
pub struct UpstreamBridge {
    config: BridgeConfig,
    credential: Option<Arc<str>>,
    connector: Arc<dyn UpstreamConnector>,
    sink: Mutex<Option<Box<dyn UpstreamSink>>>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl UpstreamBridge {
    /// Create a closed bridge. No network activity happens until [`open`](Self::open).
    #[must_use]
    pub fn new(
        config: BridgeConfig,
        credential: Option<Arc<str>>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            config,
            credential,
            connector,
            sink: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Whether the upstream connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open the upstream connection and perform the handshake.
    ///
    /// Fails synchronously with [`UpstreamError::MissingCredential`] before
    /// any network attempt if no credential was injected. On success the
    /// configuration frame has been *sent* (not acknowledged) and the
    /// returned channel yields decoded upstream events in arrival order,
    /// ending with [`BridgeEvent::Closed`] if the upstream side goes away.
    ///
    /// A bridge opens at most once; re-opening is an error.
    pub async fn open(&self) -> Result<mpsc::Receiver<BridgeEvent>, UpstreamError> {
        if self.is_open() {
            return Err(UpstreamError::AlreadyOpen);
        }
        let Some(credential) = self.credential.clone() else {
            return Err(UpstreamError::MissingCredential);
        };

        let handshake = async {
            let (mut sink, stream) = self.connector.connect(&credential).await?;
            let config_frame = UpstreamCommand::SessionUpdate {
                session: self.config.session.clone(),
            };
            sink.send(config_frame.encode()).await?;
            Ok::<_, UpstreamError>((sink, stream))
        };

        let (sink, stream) = tokio::time::timeout(self.config.handshake_timeout, handshake)
            .await
            .map_err(|_| UpstreamError::HandshakeTimeout(self.config.handshake_timeout))??;

        *self.sink.lock().await = Some(sink);
        self.open.store(true, Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer_size.max(1));
        let open = Arc::clone(&self.open);
        let cancel = self.cancel.clone();
        drop(tokio::spawn(read_loop(stream, events_tx, open, cancel)));

        Ok(events_rx)
    }

    /// Forward one base64 audio chunk to the upstream input buffer.
    ///
    /// Silent no-op while the connection is not open: the chunk is dropped,
    /// never queued. A transmit failure marks the bridge closed.
    pub async fn send_audio_chunk(&self, audio: String) {
        if !self.is_open() {
            trace!("dropping audio chunk, upstream not open");
            return;
        }
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return;
        };
        let frame = UpstreamCommand::AudioAppend { audio }.encode();
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "upstream send failed, marking bridge closed");
            self.open.store(false, Ordering::SeqCst);
        }
    }

    /// Commit the input buffer and request a response.
    ///
    /// Transmits `input_audio_buffer.commit` strictly before
    /// `response.create` — the upstream protocol rejects the reverse order.
    /// Both frames go out under one sink lock so nothing can interleave.
    pub async fn commit_and_respond(&self) {
        if !self.is_open() {
            trace!("dropping commit, upstream not open");
            return;
        }
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(UpstreamCommand::Commit.encode()).await {
            warn!(error = %e, "upstream commit failed, marking bridge closed");
            self.open.store(false, Ordering::SeqCst);
            return;
        }
        if let Err(e) = sink.send(UpstreamCommand::ResponseCreate.encode()).await {
            warn!(error = %e, "upstream response request failed, marking bridge closed");
            self.open.store(false, Ordering::SeqCst);
        }
    }

    /// Close the upstream connection.
    ///
    /// Idempotent: safe to call repeatedly, or on a bridge that never
    /// opened. Stops the reader task and closes the write half.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.open.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing upstream sink");
            }
        }
    }
}

impl Drop for UpstreamBridge {
    fn drop(&mut self) {
        // Stop the reader task even if the session never called close().
        self.cancel.cancel();
    }
}

/// Reader task: decode upstream frames into [`BridgeEvent`]s.
///
/// One loop per bridge, so per-direction ordering is the channel's FIFO
/// ordering. Frames that fail to decode are dropped here (lenient policy);
/// stream end or a read error emits [`BridgeEvent::Closed`] exactly once.
async fn read_loop(
    mut stream: Box<dyn UpstreamStream>,
    events: mpsc::Sender<BridgeEvent>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.next_frame() => frame,
        };

        match frame {
            Some(Ok(raw)) => {
                let Some(event) = decode_upstream_frame(&raw) else {
                    continue;
                };
                let event = match event {
                    UpstreamEvent::AudioDelta { delta } => BridgeEvent::AudioDelta(delta),
                    UpstreamEvent::TextDelta { delta } => BridgeEvent::TextDelta(delta),
                };
                if events.send(event).await.is_err() {
                    // Session is gone; nothing left to deliver to.
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "upstream read error, treating as close");
                open.store(false, Ordering::SeqCst);
                let _ = events.send(BridgeEvent::Closed).await;
                break;
            }
            None => {
                debug!("upstream connection closed");
                open.store(false, Ordering::SeqCst);
                let _ = events.send(BridgeEvent::Closed).await;
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockUpstream;

    use async_trait::async_trait;
    use serde_json::Value;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            session: SessionParams {
                voice: "alloy".into(),
                instructions: "speak naturally".into(),
            },
            handshake_timeout: Duration::from_secs(1),
            event_buffer_size: 32,
        }
    }

    fn bridge_with(mock: &MockUpstream, credential: Option<&str>) -> UpstreamBridge {
        UpstreamBridge::new(
            test_config(),
            credential.map(Arc::from),
            Arc::new(mock.clone()),
        )
    }

    fn frame_types(frames: &[String]) -> Vec<String> {
        frames
            .iter()
            .map(|f| {
                let v: Value = serde_json::from_str(f).unwrap();
                v["type"].as_str().unwrap().to_owned()
            })
            .collect()
    }

    #[tokio::test]
    async fn missing_credential_fails_without_connecting() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, None);

        let err = bridge.open().await.err().unwrap();
        assert!(matches!(err, UpstreamError::MissingCredential));
        assert_eq!(mock.attempts(), 0, "no network attempt may be made");
        assert!(!bridge.is_open());
    }

    #[tokio::test]
    async fn open_sends_session_update_first() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));

        let _events = bridge.open().await.unwrap();
        assert!(bridge.is_open());

        let frames = mock.sent_frames();
        assert_eq!(frames.len(), 1);
        let config: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(config["type"], "session.update");
        assert_eq!(config["session"]["voice"], "alloy");
        assert_eq!(config["session"]["instructions"], "speak naturally");
    }

    #[tokio::test]
    async fn open_twice_is_an_error() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));

        let _events = bridge.open().await.unwrap();
        let err = bridge.open().await.err().unwrap();
        assert!(matches!(err, UpstreamError::AlreadyOpen));
        assert_eq!(mock.attempts(), 1);
    }

    #[tokio::test]
    async fn connect_failure_propagates() {
        let mock = MockUpstream::refusing();
        let bridge = bridge_with(&mock, Some("sk-test"));

        let err = bridge.open().await.err().unwrap();
        assert!(matches!(err, UpstreamError::Connect(_)));
        assert!(!bridge.is_open());
    }

    struct PendingConnector;

    #[async_trait]
    impl UpstreamConnector for PendingConnector {
        async fn connect(
            &self,
            _credential: &str,
        ) -> Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamStream>), UpstreamError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn unresponsive_upstream_hits_handshake_timeout() {
        let config = BridgeConfig {
            handshake_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let bridge = UpstreamBridge::new(config, Some(Arc::from("sk-test")), Arc::new(PendingConnector));

        let err = bridge.open().await.err().unwrap();
        assert!(matches!(err, UpstreamError::HandshakeTimeout(_)));
        assert!(!bridge.is_open());
    }

    #[tokio::test]
    async fn audio_chunk_before_open_is_dropped() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));

        bridge.send_audio_chunk("QUJD".into()).await;
        assert!(mock.sent_frames().is_empty());

        // Opening later must not flush the dropped chunk.
        let _events = bridge.open().await.unwrap();
        assert_eq!(frame_types(&mock.sent_frames()), vec!["session.update"]);
    }

    #[tokio::test]
    async fn audio_chunk_when_open_is_wrapped_and_sent() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let _events = bridge.open().await.unwrap();

        bridge.send_audio_chunk("QUJD".into()).await;

        let frames = mock.sent_frames();
        assert_eq!(
            frames[1],
            r#"{"type":"input_audio_buffer.append","audio":"QUJD"}"#
        );
    }

    #[tokio::test]
    async fn commit_sends_commit_then_response_create() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let _events = bridge.open().await.unwrap();

        bridge.commit_and_respond().await;

        assert_eq!(
            frame_types(&mock.sent_frames()),
            vec!["session.update", "input_audio_buffer.commit", "response.create"]
        );
    }

    #[tokio::test]
    async fn commit_order_holds_across_repeated_calls() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let _events = bridge.open().await.unwrap();

        bridge.commit_and_respond().await;
        bridge.send_audio_chunk("QUJD".into()).await;
        bridge.commit_and_respond().await;

        let types = frame_types(&mock.sent_frames());
        assert_eq!(
            types,
            vec![
                "session.update",
                "input_audio_buffer.commit",
                "response.create",
                "input_audio_buffer.append",
                "input_audio_buffer.commit",
                "response.create",
            ]
        );
    }

    #[tokio::test]
    async fn commit_before_open_is_dropped() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));

        bridge.commit_and_respond().await;
        assert!(mock.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let _events = bridge.open().await.unwrap();

        bridge.close().await;
        assert!(!bridge.is_open());
        assert!(mock.sink_closed());

        // Second close is a no-op.
        bridge.close().await;
        assert!(!bridge.is_open());
    }

    #[tokio::test]
    async fn close_before_open_is_a_noop() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, None);

        bridge.close().await;
        bridge.close().await;
        assert!(!bridge.is_open());
        assert_eq!(mock.attempts(), 0);
    }

    #[tokio::test]
    async fn chunks_after_close_are_dropped() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let _events = bridge.open().await.unwrap();
        bridge.close().await;

        bridge.send_audio_chunk("QUJD".into()).await;
        bridge.commit_and_respond().await;
        assert_eq!(frame_types(&mock.sent_frames()), vec!["session.update"]);
    }

    #[tokio::test]
    async fn audio_delta_is_forwarded() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let mut events = bridge.open().await.unwrap();

        mock.push_frame(r#"{"type":"response.audio.delta","delta":"ZGVm"}"#);
        let event = events.recv().await.unwrap();
        assert_eq!(event, BridgeEvent::AudioDelta("ZGVm".into()));
    }

    #[tokio::test]
    async fn text_delta_is_forwarded() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let mut events = bridge.open().await.unwrap();

        mock.push_frame(r#"{"type":"response.output_text.delta","delta":"salut"}"#);
        let event = events.recv().await.unwrap();
        assert_eq!(event, BridgeEvent::TextDelta("salut".into()));
    }

    #[tokio::test]
    async fn deltas_arrive_in_order() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let mut events = bridge.open().await.unwrap();

        for i in 0..5 {
            mock.push_frame(format!(
                r#"{{"type":"response.audio.delta","delta":"chunk{i}"}}"#
            ));
        }
        for i in 0..5 {
            let event = events.recv().await.unwrap();
            assert_eq!(event, BridgeEvent::AudioDelta(format!("chunk{i}")));
        }
    }

    #[tokio::test]
    async fn unknown_and_malformed_upstream_frames_are_dropped() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let mut events = bridge.open().await.unwrap();

        mock.push_frame(r#"{"type":"session.created"}"#);
        mock.push_frame("not json");
        mock.push_frame(r#"{"type":"response.audio.delta"}"#); // no delta
        mock.push_frame(r#"{"type":"response.audio.delta","delta":"ok"}"#);

        // Only the well-formed delta comes through.
        let event = events.recv().await.unwrap();
        assert_eq!(event, BridgeEvent::AudioDelta("ok".into()));
    }

    #[tokio::test]
    async fn upstream_close_emits_closed_and_marks_bridge() {
        let mock = MockUpstream::new();
        let bridge = bridge_with(&mock, Some("sk-test"));
        let mut events = bridge.open().await.unwrap();
        assert!(bridge.is_open());

        mock.close_upstream();
        let event = events.recv().await.unwrap();
        assert_eq!(event, BridgeEvent::Closed);
        assert!(!bridge.is_open());

        // The channel ends after Closed.
        assert!(events.recv().await.is_none());
    }
}
