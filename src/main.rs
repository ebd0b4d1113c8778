// main.rs
mod buttons;
mod config;
mod dispatch;
mod error;
mod lamp;
mod metrics;
mod scene;
mod supervisor;
mod transport;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use buttons::Debouncer;
use dispatch::Dispatcher;
use lamp::tcp::TcpLampClient;
use scene::SceneEngine;
use supervisor::Supervisor;
use transport::ble::BleTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = config::Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if settings.metrics.enabled {
        metrics::setup_metrics(settings.metrics.port)?;
    }

    tracing::info!("scene switch starting");

    let engine = Arc::new(SceneEngine::new(settings.lamp_endpoints()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&engine), Arc::new(TcpLampClient)));
    let debouncer = Debouncer::new(engine, dispatcher, settings.debounce());

    let (transport, events) = BleTransport::new(settings.button.name_filters.clone()).await?;
    let supervisor = Supervisor::new(
        transport,
        events,
        debouncer,
        settings.button.name_filters.clone(),
        settings.health_check(),
    );
    supervisor.run().await;

    Ok(())
}
