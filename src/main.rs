//! vox — realtime voice relay between client WebSockets and a cloud speech
//! service.

use std::sync::Arc;
use std::time::Duration;

use vox_server::{RelayServer, ServerConfig, bridge_config_from};
use vox_upstream::RealtimeConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting vox relay");

    let settings = vox_settings::get_settings();
    if settings.upstream.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; voice sessions will be refused at handshake");
    }

    let config = ServerConfig::from(&settings.server);
    let bridge_config = bridge_config_from(&settings.upstream);
    let credential: Option<Arc<str>> = settings.upstream.api_key.as_deref().map(Arc::from);
    let connector = Arc::new(RealtimeConnector::new(
        &settings.upstream.base_url,
        &settings.upstream.model,
    ));

    let metrics = vox_server::metrics::install_recorder();
    let server = RelayServer::new(config, bridge_config, credential, connector, metrics);
    let (addr, serve_handle) = server.listen().await?;
    tracing::info!(addr = %addr, model = %settings.upstream.model, "vox relay ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(vec![serve_handle], Some(Duration::from_secs(10)))
        .await;

    Ok(())
}
