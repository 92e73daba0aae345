//! Settings type definitions.
//!
//! Serialized as camelCase JSON so the settings file reads the same as the
//! wire protocol. The upstream credential is deliberately **not** part of
//! the file format — it comes from the environment only and is never
//! written back to disk.

use serde::{Deserialize, Serialize};

/// Top-level settings for the vox relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoxSettings {
    /// Settings schema version.
    pub version: String,
    /// Client-facing server settings.
    pub server: ServerSettings,
    /// Upstream speech-service settings.
    pub upstream: UpstreamSettings,
}

impl Default for VoxSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
        }
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` for auto-assign).
    pub port: u16,
    /// Maximum number of concurrent relay sessions.
    pub max_connections: usize,
    /// WebSocket heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 64,
            heartbeat_interval_secs: 30,
            max_message_size: 1024 * 1024, // 1 MiB
        }
    }
}

/// Upstream speech-service settings.
///
/// The credential itself is injected from the `OPENAI_API_KEY` environment
/// variable at load time; see [`crate::loader::apply_env_overrides`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Base WebSocket URL of the realtime speech service.
    pub base_url: String,
    /// Model identifier appended as the `model` query parameter.
    pub model: String,
    /// Voice identity for synthesized audio.
    pub voice: String,
    /// Fixed behavioral instruction sent in the handshake.
    pub instructions: String,
    /// Bound on the connect + handshake, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Capacity of the per-session upstream event channel.
    pub event_buffer_size: usize,
    /// Bearer credential for the upstream service. Environment-only:
    /// never serialized, absent unless `OPENAI_API_KEY` is set.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            instructions: "Understand any spoken language and respond naturally in the same \
                           language using conversational voice."
                .to_string(),
            handshake_timeout_ms: 10_000,
            event_buffer_size: 256,
            api_key: None,
        }
    }
}
