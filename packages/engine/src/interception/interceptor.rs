// packages/engine/src/interception/interceptor.rs
//! Interceptor
//!
//! Entry point for callers: consults the gate and either hands the request
//! back for pass-through or starts an [`ExchangeSession`] on its own task.

use crate::interception::gate::InterceptGate;
use crate::interception::host_filter::HostFilter;
use crate::interception::relay::RelayChannel;
use crate::interception::request::OutboundRequest;
use crate::interception::session::{ExchangeSession, SessionPolicy, StopHandle};
use crate::interception::transport::Transport;
use crate::recording::record::ExchangeRecord;
use crate::recording::recorder::Recorder;
use crate::utils::config::CaptureConfig;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What the interceptor did with a request
#[derive(Debug)]
pub enum Dispatch {
    /// Not intercepted; the caller sends it through its normal path
    PassThrough(OutboundRequest),

    /// An exchange session is running for it
    Intercepted(ExchangeHandle),
}

/// Handle to a running exchange
#[derive(Debug)]
pub struct ExchangeHandle {
    id: String,
    stop: StopHandle,
    task: JoinHandle<ExchangeRecord>,
}

impl ExchangeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancel the exchange; captured data is kept
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the final record
    pub async fn join(self) -> Result<ExchangeRecord> {
        self.task
            .await
            .map_err(|e| EngineError::InterceptionFailed(format!("Exchange {} task failed: {}", self.id, e)))
    }
}

pub struct Interceptor {
    gate: InterceptGate,
    transport: Arc<dyn Transport>,
    recorder: Arc<dyn Recorder>,
    policy: SessionPolicy,
}

impl Interceptor {
    pub fn new(
        capture: &CaptureConfig,
        transport: Arc<dyn Transport>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        let gate = InterceptGate::with_filter(HostFilter::from_patterns(&capture.ignored_hosts));
        Self::with_policy(gate, transport, recorder, capture.into())
    }

    pub fn with_policy(
        gate: InterceptGate,
        transport: Arc<dyn Transport>,
        recorder: Arc<dyn Recorder>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            gate,
            transport,
            recorder,
            policy,
        }
    }

    pub fn gate(&self) -> &InterceptGate {
        &self.gate
    }

    /// Intercept `request` or hand it back untouched
    ///
    /// Must be called within a tokio runtime.
    pub fn dispatch(&self, request: OutboundRequest, relay: Arc<dyn RelayChannel>) -> Dispatch {
        let request = InterceptGate::canonical_request(request);

        if !self.gate.should_intercept(&request) {
            debug!("Passing through {} {}", request.method, request.uri);
            return Dispatch::PassThrough(request);
        }

        let mut session =
            ExchangeSession::new(request, relay, Arc::clone(&self.recorder), self.policy);
        session.start(self.transport.as_ref());

        let id = session.id().to_string();
        let stop = session.stop_handle();
        let task = tokio::spawn(session.run());

        Dispatch::Intercepted(ExchangeHandle { id, stop, task })
    }
}
