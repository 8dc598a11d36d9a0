// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate, later sources overriding earlier ones:
//!
//! 1. Built-in defaults (`#[serde(default)]` on every section)
//! 2. Optional `wiretap.{toml,yaml,json}` in the working directory
//! 3. Environment variables such as `WIRETAP__PROXY__PORT=9090`

use crate::interception::session::RedirectStrategy;
use crate::interception::tls_handler::ServerTrustPolicy;
use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Proxy front end
    pub proxy: ProxyConfig,

    /// Capture and relay policies
    pub capture: CaptureConfig,

    /// Network transport
    pub transport: TransportConfig,

    /// Recorder queue
    pub recorder: RecorderSettings,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Load configuration from `wiretap.*` and `WIRETAP__*` variables
    pub fn load() -> Result<Self> {
        Self::load_from("wiretap")
    }

    /// Load configuration using `base_name` as the optional file stem
    pub fn load_from(base_name: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(base_name).required(false))
            .add_source(
                Environment::with_prefix("WIRETAP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Proxy listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

/// Capture settings shared by every exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// How redirects offered by the transport are handled
    pub redirect_strategy: RedirectStrategy,

    /// How server identity challenges are answered
    pub server_trust: ServerTrustPolicy,

    /// Cap on captured bytes of a streamed request body
    pub max_request_body_bytes: usize,

    /// Host patterns (`host` or `*.suffix`) that are never intercepted
    pub ignored_hosts: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            redirect_strategy: RedirectStrategy::Follow,
            server_trust: ServerTrustPolicy::ValidateWithTrustStore,
            max_request_body_bytes: 1024 * 1024, // 1 MiB
            ignored_hosts: Vec::new(),
        }
    }
}

/// Settings for the hyper transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Redirect hops followed before the exchange fails
    pub max_redirects: usize,

    /// Per-exchange event channel capacity
    pub event_buffer: usize,

    /// Idle pooled connection timeout (seconds)
    pub pool_idle_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_redirects: 16,
            event_buffer: 64,
            pool_idle_timeout_secs: 90,
        }
    }
}

/// Settings for the queued recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Maximum snapshots buffered before new ones are dropped
    pub queue_capacity: usize,

    /// Background flush interval (milliseconds)
    pub flush_interval_ms: u64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            flush_interval_ms: 100,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    pub log_filter: String,

    pub log_format: LogFormat,

    /// Prometheus scrape endpoint; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,wiretap_engine=debug".to_string(),
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.proxy.port, 8888);
        assert_eq!(config.capture.redirect_strategy, RedirectStrategy::Follow);
        assert_eq!(
            config.capture.server_trust,
            ServerTrustPolicy::ValidateWithTrustStore
        );
        assert_eq!(config.transport.max_redirects, 16);
        assert!(config.observability.metrics_addr.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load_from("does-not-exist-wiretap-test").unwrap();
        assert_eq!(config.capture.max_request_body_bytes, 1024 * 1024);
        assert!(config.capture.ignored_hosts.is_empty());
    }

    #[test]
    fn test_partial_json_overrides() {
        let raw = r#"{"capture": {"redirect_strategy": "caller_decides", "server_trust": "trust_presented_credential"}}"#;
        let config: EngineConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.capture.redirect_strategy, RedirectStrategy::CallerDecides);
        assert_eq!(
            config.capture.server_trust,
            ServerTrustPolicy::TrustPresentedCredential
        );
        assert_eq!(config.proxy.host, "127.0.0.1");
    }
}
