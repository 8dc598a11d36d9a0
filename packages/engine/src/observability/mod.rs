// packages/engine/src/observability/mod.rs
//! Logging and metrics
//!
//! - **Tracing**: `tracing-subscriber` registry with an `EnvFilter` and a
//!   pretty or JSON formatter
//! - **Metrics**: `metrics` facade, exported through Prometheus when a
//!   scrape address is configured

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const EXCHANGES_STARTED: &str = "wiretap_exchanges_started_total";
pub const EXCHANGES_COMPLETED: &str = "wiretap_exchanges_completed_total";
pub const EXCHANGES_FAILED: &str = "wiretap_exchanges_failed_total";
pub const EXCHANGES_CANCELLED: &str = "wiretap_exchanges_cancelled_total";
pub const RESPONSE_BYTES: &str = "wiretap_response_bytes_total";
pub const EXCHANGE_DURATION: &str = "wiretap_exchange_duration_seconds";
pub const RECORDER_DROPPED: &str = "wiretap_recorder_dropped_total";

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    result.map_err(|e| EngineError::ConfigError(format!("Failed to install tracing: {}", e)))
}

/// Install the Prometheus exporter on `addr`
///
/// Without an exporter the `metrics` macros are no-ops.
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ConfigError(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}
