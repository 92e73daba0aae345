//! Recording mock for the upstream transport.
//!
//! Used by bridge unit tests and the server integration tests. Records
//! every frame the bridge transmits (in order), counts connection
//! attempts, and lets a test inject upstream frames or close the upstream
//! side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::UpstreamError;
use crate::transport::{UpstreamConnector, UpstreamSink, UpstreamStream};

/// A mock upstream endpoint.
///
/// Cloning shares the underlying state, so a test can keep one handle for
/// assertions while the bridge owns another as its connector.
#[derive(Clone)]
pub struct MockUpstream {
    state: Arc<MockState>,
}

struct MockState {
    attempts: AtomicUsize,
    fail_connect: AtomicBool,
    sent: Mutex<Vec<String>>,
    sink_closed: AtomicBool,
    frame_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    frame_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MockUpstream {
    /// Create a mock that accepts connections.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(MockState {
                attempts: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                sink_closed: AtomicBool::new(false),
                frame_tx: Mutex::new(Some(tx)),
                frame_rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Create a mock whose connection attempts all fail.
    #[must_use]
    pub fn refusing() -> Self {
        let mock = Self::new();
        mock.state.fail_connect.store(true, Ordering::SeqCst);
        mock
    }

    /// Number of connection attempts made against this mock.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Every frame transmitted by the bridge, in transmission order.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<String> {
        self.state.sent.lock().clone()
    }

    /// Whether the bridge closed its write half.
    #[must_use]
    pub fn sink_closed(&self) -> bool {
        self.state.sink_closed.load(Ordering::SeqCst)
    }

    /// Inject one frame as if the upstream service had sent it.
    pub fn push_frame(&self, frame: impl Into<String>) {
        if let Some(tx) = self.state.frame_tx.lock().as_ref() {
            let _ = tx.send(frame.into());
        }
    }

    /// Close the upstream side: the bridge's read stream ends.
    pub fn close_upstream(&self) {
        let _ = self.state.frame_tx.lock().take();
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamConnector for MockUpstream {
    async fn connect(
        &self,
        _credential: &str,
    ) -> Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamStream>), UpstreamError> {
        let _ = self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(UpstreamError::Connect("mock connection refused".into()));
        }

        // Re-arm the frame channel if a previous connection consumed it.
        let rx = {
            let mut rx_guard = self.state.frame_rx.lock();
            match rx_guard.take() {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    *self.state.frame_tx.lock() = Some(tx);
                    rx
                }
            }
        };

        Ok((
            Box::new(MockSink {
                state: Arc::clone(&self.state),
            }),
            Box::new(MockStream { rx }),
        ))
    }
}

struct MockSink {
    state: Arc<MockState>,
}

#[async_trait]
impl UpstreamSink for MockSink {
    async fn send(&mut self, frame: String) -> Result<(), UpstreamError> {
        self.state.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        self.state.sink_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl UpstreamStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<String, UpstreamError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_attempts_and_frames() {
        let mock = MockUpstream::new();
        assert_eq!(mock.attempts(), 0);

        let (mut sink, _stream) = mock.connect("key").await.unwrap();
        assert_eq!(mock.attempts(), 1);

        sink.send("one".into()).await.unwrap();
        sink.send("two".into()).await.unwrap();
        assert_eq!(mock.sent_frames(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn refusing_mock_fails_connect() {
        let mock = MockUpstream::refusing();
        let err = mock.connect("key").await.err().unwrap();
        assert!(matches!(err, UpstreamError::Connect(_)));
        assert_eq!(mock.attempts(), 1);
    }

    #[tokio::test]
    async fn injected_frames_reach_the_stream() {
        let mock = MockUpstream::new();
        let (_sink, mut stream) = mock.connect("key").await.unwrap();

        mock.push_frame("hello");
        let frame = stream.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, "hello");
    }

    #[tokio::test]
    async fn close_upstream_ends_the_stream() {
        let mock = MockUpstream::new();
        let (_sink, mut stream) = mock.connect("key").await.unwrap();

        mock.close_upstream();
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn sink_close_is_observable() {
        let mock = MockUpstream::new();
        let (mut sink, _stream) = mock.connect("key").await.unwrap();
        assert!(!mock.sink_closed());

        sink.close().await.unwrap();
        assert!(mock.sink_closed());
    }

    #[tokio::test]
    async fn reconnect_rearms_the_frame_channel() {
        let mock = MockUpstream::new();
        let (_s1, stream1) = mock.connect("key").await.unwrap();
        drop(stream1);

        let (_s2, mut stream2) = mock.connect("key").await.unwrap();
        mock.push_frame("again");
        let frame = stream2.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, "again");
        assert_eq!(mock.attempts(), 2);
    }
}
