// packages/engine/src/proxy/mod.rs
//! Forward proxy front end
//!
//! Accepts plain-HTTP proxy requests (absolute-form URIs), feeds them to the
//! [`Interceptor`](crate::interception::Interceptor) and streams the relayed
//! response back to the client. Pass-through requests are forwarded without
//! capture.

pub mod server;

pub use server::{ProxyBody, ProxyServer};
