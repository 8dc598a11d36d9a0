// packages/engine/src/utils/mod.rs
//! Shared utilities
//!
//! - **errors**: Engine-wide error type and `Result` alias
//! - **config**: Layered configuration (defaults, file, environment)

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
