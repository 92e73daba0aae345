//! Wire protocol for the relay.
//!
//! Four message universes, one-way-typed per direction so the client
//! vocabulary never leaks upstream and the upstream vocabulary never leaks
//! to the client:
//!
//! - [`ClientEvent`]: client → relay (audio append / commit)
//! - [`ServerEvent`]: relay → client (ready / audio delta / text delta)
//! - [`UpstreamCommand`]: relay → upstream (session config / append / commit / response request)
//! - [`UpstreamEvent`]: upstream → relay (audio delta / text delta)
//!
//! Every frame is a JSON document tagged by a `type` discriminant.
//!
//! # Lenient decode policy
//!
//! Malformed frames and unrecognized `type` values are **dropped, not
//! fatal**: [`decode_client_frame`] and [`decode_upstream_frame`] return
//! `None` and log at debug level, and the connection stays up. This is a
//! deliberate best-effort policy for a realtime stream — one garbled frame
//! must not kill a live voice session.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Client → relay
// ─────────────────────────────────────────────────────────────────────────────

/// A frame received from a client connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One base64 chunk of input audio to forward to the upstream buffer.
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded audio bytes.
        audio: String,
    },
    /// Finalize the input buffer and request a spoken response.
    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay → client
// ─────────────────────────────────────────────────────────────────────────────

/// A frame sent to a client connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The upstream handshake completed; the client may start streaming.
    #[serde(rename = "session.ready")]
    SessionReady,
    /// One chunk of synthesized audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded audio bytes.
        delta: String,
    },
    /// One chunk of response text.
    #[serde(rename = "response.output_text.delta")]
    TextDelta {
        /// UTF-8 text fragment.
        delta: String,
    },
}

impl ServerEvent {
    /// Serialize to the wire JSON.
    ///
    /// Serialization of these variants cannot fail in practice; on the
    /// impossible path an empty string is returned and an error logged.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize server event");
            String::new()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay → upstream
// ─────────────────────────────────────────────────────────────────────────────

/// Voice and behavior parameters sent in the upstream handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Voice identity for synthesized audio.
    pub voice: String,
    /// Fixed behavioral instruction for the speech model.
    pub instructions: String,
}

/// A frame sent on the upstream connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamCommand {
    /// Handshake configuration, sent once immediately after connect.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Voice and behavior parameters.
        session: SessionParams,
    },
    /// One base64 chunk appended to the upstream input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded audio bytes.
        audio: String,
    },
    /// Commit the input buffer. Must precede [`UpstreamCommand::ResponseCreate`].
    #[serde(rename = "input_audio_buffer.commit")]
    Commit,
    /// Request a response for the committed buffer.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl UpstreamCommand {
    /// Serialize to the wire JSON.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize upstream command");
            String::new()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream → relay
// ─────────────────────────────────────────────────────────────────────────────

/// A frame received on the upstream connection that the relay cares about.
///
/// The upstream service emits many other message kinds; they fail to decode
/// into this enum and are dropped by [`decode_upstream_frame`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    /// One chunk of synthesized audio.
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded audio bytes.
        delta: String,
    },
    /// One chunk of response text.
    #[serde(rename = "response.output_text.delta")]
    TextDelta {
        /// UTF-8 text fragment.
        delta: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Lenient decode
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a client frame, dropping anything unrecognized.
///
/// Returns `None` for invalid JSON, unknown `type` values, and frames with
/// missing or mistyped fields. The caller keeps the connection open either
/// way — dropping is the policy, not an error.
#[must_use]
pub fn decode_client_frame(raw: &str) -> Option<ClientEvent> {
    match serde_json::from_str(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, len = raw.len(), "dropping client frame");
            None
        }
    }
}

/// Decode an upstream frame, dropping anything unrecognized.
///
/// Same leniency policy as [`decode_client_frame`]: the upstream emits many
/// message kinds the relay does not forward, and an occasional malformed
/// frame must not tear down a live session.
#[must_use]
pub fn decode_upstream_frame(raw: &str) -> Option<UpstreamEvent> {
    match serde_json::from_str(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, len = raw.len(), "dropping upstream frame");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
