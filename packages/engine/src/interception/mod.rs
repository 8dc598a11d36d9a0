// packages/engine/src/interception/mod.rs
//! Request interception layer
//!
//! - **Gate**: decides whether a request is intercepted and marks the
//!   engine's own clones so they are never intercepted twice
//! - **Session**: per-exchange state machine relaying and recording events
//! - **Transport**: pluggable network layer producing exchange events
//! - **Relay**: delivery of events back to the original caller
//! - **TLS Handler**: server trust policy
//!
//! # Architecture
//!
//! ```text
//! Caller request
//!     │
//!     ├─ Gate says no ──────────→ pass-through
//!     └─ Gate says yes → ExchangeSession
//!                          ├─ marked clone → Transport → events
//!                          ├─ events → RelayChannel (caller)
//!                          └─ snapshots → Recorder
//! ```

pub mod body_tap;
pub mod gate;
pub mod host_filter;
pub mod hyper_transport;
pub mod interceptor;
pub mod relay;
pub mod request;
pub mod scripted;
pub mod session;
pub mod tls_handler;
pub mod transport;

// Re-export commonly used types
pub use body_tap::BodyTap;
pub use gate::{InterceptGate, InterceptMarker};
pub use host_filter::HostFilter;
pub use hyper_transport::HyperTransport;
pub use interceptor::{Dispatch, ExchangeHandle, Interceptor};
pub use relay::{ChannelRelay, RelayChannel, RelayEvent};
pub use request::{CachePolicy, CacheStorageHint, OutboundRequest, RequestBody};
pub use session::{ExchangeSession, Flow, RedirectStrategy, SessionPolicy, StopHandle};
pub use tls_handler::ServerTrustPolicy;
pub use transport::{
    AuthChallenge, ChallengeDisposition, RedirectDecision, Transport, TransportAdapter,
    TransportError, TransportErrorKind, TransportEvent,
};
