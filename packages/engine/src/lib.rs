// packages/engine/src/lib.rs
//! Wiretap Engine Library
//!
//! Transparent HTTP interception: requests issued by a caller are captured
//! into exchange records while every response event is relayed back to the
//! caller unchanged.
//!
//! # Architecture
//!
//! - **interception**: gate, exchange sessions, transports and relays
//! - **recording**: exchange records and recorder sinks
//! - **proxy**: plain-HTTP forward proxy front end
//! - **observability**: Metrics, tracing, and logging
//! - **utils**: Configuration and errors

// Public module exports
pub mod interception;
pub mod observability;
pub mod proxy;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use interception::{Dispatch, ExchangeHandle, InterceptGate, Interceptor, OutboundRequest};
pub use recording::{ExchangeRecord, ExchangeState, Recorder};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
