//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use vox_core::protocol::SessionParams;
use vox_settings::{ServerSettings, UpstreamSettings};
use vox_upstream::BridgeConfig;

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent relay sessions.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 64,
            heartbeat_interval_secs: 30,
            max_message_size: 1024 * 1024, // 1 MiB
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            max_message_size: s.max_message_size,
        }
    }
}

/// Build the per-session bridge configuration from upstream settings.
#[must_use]
pub fn bridge_config_from(s: &UpstreamSettings) -> BridgeConfig {
    BridgeConfig {
        session: SessionParams {
            voice: s.voice.clone(),
            instructions: s.instructions.clone(),
        },
        handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
        event_buffer_size: s.event_buffer_size,
    }
}
