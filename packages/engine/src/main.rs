// packages/engine/src/main.rs
//! Wiretap
//!
//! Forward proxy capturing every HTTP exchange that passes through it.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wiretap_engine::interception::{HyperTransport, Interceptor};
use wiretap_engine::observability::{init_metrics, init_tracing};
use wiretap_engine::proxy::ProxyServer;
use wiretap_engine::recording::{LogRecorder, QueuedRecorder, RecorderConfig};
use wiretap_engine::utils::config::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;

    // Initialize observability (tracing, metrics, logging)
    init_tracing(&config.observability)?;
    init_metrics(config.observability.metrics_addr)?;

    info!("Starting Wiretap v{}", wiretap_engine::VERSION);
    info!("Configuration loaded: {:?}", config);

    let transport = Arc::new(HyperTransport::new(
        config.transport.clone(),
        config.capture.server_trust,
    )?);

    let recorder = Arc::new(QueuedRecorder::new(
        RecorderConfig::from(config.recorder.clone()),
        Arc::new(LogRecorder),
    ));
    recorder.start();

    let interceptor = Arc::new(Interceptor::new(
        &config.capture,
        transport.clone(),
        recorder.clone(),
    ));

    let addr: SocketAddr = format!("{}:{}", config.proxy.host, config.proxy.port)
        .parse()
        .context("Invalid proxy address")?;
    let listener = ProxyServer::bind(addr).await?;
    let server = Arc::new(ProxyServer::new(interceptor, transport));

    // Graceful shutdown handler
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal, cleaning up..."),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    let result = server.serve(listener, shutdown).await;

    recorder.shutdown().await?;
    let stats = recorder.stats();
    info!(
        "Recorder flushed {} snapshots ({} dropped)",
        stats.flushed, stats.queue.drop_count
    );

    match result {
        Ok(()) => {
            info!("Proxy stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Proxy error: {}", e);
            Err(e.into())
        }
    }
}
