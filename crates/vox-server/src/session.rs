//! Relay session lifecycle — one task per connected client, from upgrade
//! through disconnect.
//!
//! Each session walks `ACCEPTED → CONNECTING_UPSTREAM → READY → CLOSED`:
//! the upstream bridge is opened before anything is promised to the client,
//! `session.ready` is sent exactly once on success, and every exit path
//! funnels through the same teardown so the upstream connection can never
//! outlive its client.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};

use vox_core::SessionId;
use vox_core::protocol::{ClientEvent, ServerEvent, decode_client_frame};
use vox_upstream::{BridgeEvent, UpstreamBridge};

use crate::metrics::{
    RELAY_FRAMES_DROPPED_TOTAL, UPSTREAM_CONNECT_FAILURES_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// Run a relay session for a connected client.
///
/// 1. Opens the upstream bridge (closing the client on failure, with no
///    explanation frame and no `session.ready`)
/// 2. Sends exactly one `session.ready`
/// 3. Relays frames in both directions, in arrival order per direction
/// 4. Tears down the bridge on disconnect from either side
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_voice_session(ws: WebSocket, session_id: SessionId, state: AppState) {
    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    drive_session(ws, &state).await;

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// The session body: bridge handshake, ready frame, relay loop, teardown.
async fn drive_session(mut ws: WebSocket, state: &AppState) {
    let bridge = UpstreamBridge::new(
        state.bridge_config.clone(),
        state.credential.clone(),
        state.connector.clone(),
    );

    // ACCEPTED → CONNECTING_UPSTREAM. A failure here is terminal: the
    // client observes only the close, never an error frame.
    let mut upstream = match bridge.open().await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "upstream handshake failed, closing client");
            counter!(UPSTREAM_CONNECT_FAILURES_TOTAL).increment(1);
            let _ = ws.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws.split();

    // CONNECTING_UPSTREAM → READY. Exactly one ready frame, always before
    // any delta.
    if ws_tx
        .send(Message::Text(ServerEvent::SessionReady.encode().into()))
        .await
        .is_err()
    {
        bridge.close().await;
        return;
    }

    let mut ping_interval =
        tokio::time::interval(Duration::from_secs(state.config.heartbeat_interval_secs));
    let _ = ping_interval.tick().await; // consume the immediate first tick

    // READY → CLOSED, from whichever side ends first.
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        route_client_frame(&bridge, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Some clients frame JSON as binary; accept valid UTF-8.
                        match std::str::from_utf8(&data) {
                            Ok(text) => route_client_frame(&bridge, text).await,
                            Err(_) => {
                                debug!(len = data.len(), "dropping non-UTF8 binary client frame");
                                counter!(RELAY_FRAMES_DROPPED_TOTAL).increment(1);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("client closed the connection");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "client read error");
                        break;
                    }
                }
            }
            event = upstream.recv() => {
                if !forward_upstream_event(&mut ws_tx, event).await {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Client disconnect is the cancellation signal: close the upstream
    // link before the session task returns.
    bridge.close().await;
}

/// Route one decoded client frame to the bridge.
///
/// Malformed and unrecognized frames are dropped here by policy — the
/// session stays up and nothing is forwarded.
async fn route_client_frame(bridge: &UpstreamBridge, raw: &str) {
    match decode_client_frame(raw) {
        Some(ClientEvent::AudioAppend { audio }) => bridge.send_audio_chunk(audio).await,
        Some(ClientEvent::AudioCommit) => bridge.commit_and_respond().await,
        None => counter!(RELAY_FRAMES_DROPPED_TOTAL).increment(1),
    }
}

/// Forward one bridge event to the client. Returns `false` when the session
/// should end (upstream closed, or the client socket is gone).
async fn forward_upstream_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: Option<BridgeEvent>,
) -> bool {
    let frame = match event {
        Some(BridgeEvent::AudioDelta(delta)) => ServerEvent::AudioDelta { delta },
        Some(BridgeEvent::TextDelta(delta)) => ServerEvent::TextDelta { delta },
        Some(BridgeEvent::Closed) | None => {
            info!("upstream closed, ending session");
            let _ = ws_tx.send(Message::Close(None)).await;
            return false;
        }
    };
    ws_tx
        .send(Message::Text(frame.encode().into()))
        .await
        .is_ok()
}
