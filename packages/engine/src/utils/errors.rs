// packages/engine/src/utils/errors.rs
//! Engine error types

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the interception engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Admission or dispatch of an intercepted request failed
    #[error("interception failed: {0}")]
    InterceptionFailed(String),

    /// The re-issued network call failed; carries the transport's description verbatim
    #[error("{0}")]
    TransportFailed(String),

    /// Delivering an event to the original caller failed
    #[error("relay failed: {0}")]
    RelayFailed(String),

    /// Publishing a snapshot to the recorder failed
    #[error("recording failed: {0}")]
    RecordingFailed(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// TLS setup failed
    #[error("tls error: {0}")]
    TlsError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_is_verbatim() {
        let err = EngineError::TransportFailed("timeout".to_string());
        assert_eq!(err.to_string(), "timeout");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
