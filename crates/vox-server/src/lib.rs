//! # vox-server
//!
//! Axum HTTP + `WebSocket` server hosting the relay sessions.
//!
//! - `WebSocket` gateway at `/realtime-voice`: one relay session per
//!   connection, each bridging to its own upstream speech connection
//! - HTTP endpoints: `/health`, `/metrics` (Prometheus)
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::{ServerConfig, bridge_config_from};
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
