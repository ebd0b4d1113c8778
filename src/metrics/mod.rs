// metrics/mod.rs
use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub fn setup_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}
