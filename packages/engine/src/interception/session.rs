// packages/engine/src/interception/session.rs
//! Exchange session
//!
//! Orchestrates one interception: marks a clone of the caller's request,
//! opens a transport adapter for it, relays every adapter event to the
//! original caller and mirrors the same events into the exchange record.
//!
//! # State machine
//!
//! ```text
//! Created → Started → HeadersReceived → Completed
//!              │             │
//!              ├─────────────┴────────→ Failed
//!              └─────────────┴────────→ Cancelled (stop)
//! ```
//!
//! Events for one session arrive strictly sequentially, so the record needs
//! no locking. Relay always happens before the matching record mutation and
//! a relay failure never prevents capture.

use crate::interception::body_tap::BodyTap;
use crate::interception::gate::InterceptGate;
use crate::interception::relay::RelayChannel;
use crate::interception::request::{BodyStream, CacheStorageHint, OutboundRequest, RequestBody};
use crate::interception::tls_handler::ServerTrustPolicy;
use crate::interception::transport::{
    ChallengeOffer, RedirectDecision, RedirectOffer, Transport, TransportAdapter, TransportError,
    TransportEvent,
};
use crate::observability::{
    EXCHANGES_CANCELLED, EXCHANGES_COMPLETED, EXCHANGES_FAILED, EXCHANGES_STARTED,
    EXCHANGE_DURATION, RESPONSE_BYTES,
};
use crate::recording::record::{
    ExchangeRecord, ExchangeState, RedirectHop, RequestSnapshot, ResponseSnapshot,
};
use crate::recording::recorder::Recorder;
use crate::utils::config::CaptureConfig;
use crate::utils::errors::Result;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How redirects offered by the transport are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectStrategy {
    /// Always follow, without consulting the caller
    #[default]
    Follow,

    /// Ask [`RelayChannel::redirect_decision`] after relaying the redirect
    CallerDecides,
}

/// Per-session policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub redirect_strategy: RedirectStrategy,
    pub server_trust: ServerTrustPolicy,

    /// Cap on captured bytes of a streamed request body
    pub max_request_body_bytes: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        (&CaptureConfig::default()).into()
    }
}

impl From<&CaptureConfig> for SessionPolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            redirect_strategy: config.redirect_strategy,
            server_trust: config.server_trust,
            max_request_body_bytes: config.max_request_body_bytes,
        }
    }
}

/// Outcome of feeding one input to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Event processed, more expected
    Continue,

    /// The session reached a terminal state
    Terminal,

    /// Event discarded (before start or after termination)
    Ignored,
}

/// Cloneable handle requesting a running session to stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One intercepted exchange
pub struct ExchangeSession {
    state: ExchangeState,
    record: ExchangeRecord,

    /// Caller's request, consumed on start
    request: Option<OutboundRequest>,

    hint: CacheStorageHint,
    body_tap: Option<BodyTap>,
    adapter: Option<Box<dyn TransportAdapter>>,
    relay: Arc<dyn RelayChannel>,
    recorder: Arc<dyn Recorder>,
    policy: SessionPolicy,
    stop: CancellationToken,
}

impl ExchangeSession {
    /// Create a session in the `Created` state
    pub fn new(
        request: OutboundRequest,
        relay: Arc<dyn RelayChannel>,
        recorder: Arc<dyn Recorder>,
        policy: SessionPolicy,
    ) -> Self {
        let hint = request.cache_policy.storage_hint();
        let record = ExchangeRecord::new(RequestSnapshot::capture(&request));

        Self {
            state: ExchangeState::Created,
            record,
            request: Some(request),
            hint,
            body_tap: None,
            adapter: None,
            relay,
            recorder,
            policy,
            stop: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn record(&self) -> &ExchangeRecord {
        &self.record
    }

    /// Caching hint relayed with the response headers
    pub fn cache_hint(&self) -> CacheStorageHint {
        self.hint
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    /// `Created → Started`: issue the marked clone through `transport`
    pub fn start(&mut self, transport: &dyn Transport) -> Flow {
        if self.state != ExchangeState::Created {
            warn!("Exchange {}: start requested in state {}", self.record.id, self.state.as_str());
            return Flow::Ignored;
        }
        let Some(request) = self.request.take() else {
            return Flow::Ignored;
        };

        let mut internal = InterceptGate::mark_as_internal(&request);

        if let RequestBody::Stream(body) = &internal.body {
            if let Some(stream) = body.take() {
                let (tapped, tap) = BodyTap::wrap(stream, self.policy.max_request_body_bytes);
                internal.body = RequestBody::Stream(BodyStream::new(tapped));
                self.body_tap = Some(tap);
            }
        }

        info!(
            "Exchange {} started: {} {}",
            self.record.id, internal.method, internal.uri
        );
        metrics::counter!(EXCHANGES_STARTED).increment(1);

        self.record.started_at = Utc::now();
        self.set_state(ExchangeState::Started);
        self.adapter = Some(transport.open(internal));
        self.publish();

        Flow::Continue
    }

    /// Process one adapter event
    pub fn handle(&mut self, event: TransportEvent) -> Flow {
        if self.state.is_terminal() {
            warn!(
                "Exchange {}: discarding late {} event after {}",
                self.record.id,
                event.kind(),
                self.state.as_str()
            );
            return Flow::Ignored;
        }
        if self.state == ExchangeState::Created {
            warn!(
                "Exchange {}: discarding {} event before start",
                self.record.id,
                event.kind()
            );
            return Flow::Ignored;
        }

        debug!("Exchange {}: {} event", self.record.id, event.kind());

        match event {
            TransportEvent::Headers(response) => self.on_headers(response),
            TransportEvent::Data(chunk) => self.on_data(chunk),
            TransportEvent::Redirect(offer) => self.on_redirect(offer),
            TransportEvent::AuthChallenge(offer) => self.on_challenge(offer),
            TransportEvent::Completed => self.on_completed(),
            TransportEvent::Failed(error) => self.on_failed(error),
        }
    }

    /// Cancel the in-flight call and finalize with whatever was captured
    pub fn stop(&mut self) -> Flow {
        if !matches!(
            self.state,
            ExchangeState::Started | ExchangeState::HeadersReceived
        ) {
            debug!(
                "Exchange {}: stop ignored in state {}",
                self.record.id,
                self.state.as_str()
            );
            return Flow::Ignored;
        }

        if let Some(adapter) = self.adapter.as_mut() {
            adapter.cancel();
        }

        self.finalize(ExchangeState::Cancelled);
        self.publish();
        self.teardown();
        Flow::Terminal
    }

    /// Drive the session until it terminates or is stopped
    pub async fn run(mut self) -> ExchangeRecord {
        let stop = self.stop.clone();

        while !self.state.is_terminal() {
            let next = {
                let Some(adapter) = self.adapter.as_mut() else {
                    break;
                };

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => None,
                    event = adapter.next_event() => Some(event),
                }
            };

            match next {
                None => {
                    self.stop();
                }
                Some(Some(event)) => {
                    self.handle(event);
                }
                Some(None) => {
                    warn!("Exchange {}: transport ended without a terminal event", self.record.id);
                    self.handle(TransportEvent::Failed(TransportError::closed()));
                }
            }
        }

        self.record.clone()
    }

    fn on_headers(&mut self, response: ResponseSnapshot) -> Flow {
        let relayed = self.relay.on_headers(&response, self.hint);
        self.check_relay("headers", relayed);

        if !self.record.set_response(response) {
            warn!("Exchange {}: duplicate response headers, keeping the first", self.record.id);
        }
        if self.state == ExchangeState::Started {
            self.set_state(ExchangeState::HeadersReceived);
        }

        self.publish();
        Flow::Continue
    }

    fn on_data(&mut self, chunk: Bytes) -> Flow {
        let relayed = self.relay.on_data(&chunk);
        self.check_relay("data", relayed);

        metrics::counter!(RESPONSE_BYTES).increment(chunk.len() as u64);
        self.record.append_body(&chunk);
        Flow::Continue
    }

    fn on_redirect(&mut self, offer: RedirectOffer) -> Flow {
        let RedirectOffer {
            request,
            response,
            reply,
        } = offer;

        let relayed = self.relay.on_redirect(&request, &response);
        self.check_relay("redirect", relayed);

        self.record.redirects.push(RedirectHop {
            status: response.status,
            from: response.url.clone(),
            to: request.url.clone(),
        });

        let decision = match self.policy.redirect_strategy {
            RedirectStrategy::Follow => RedirectDecision::Follow,
            RedirectStrategy::CallerDecides => self.relay.redirect_decision(&request, &response),
        };
        debug!(
            "Exchange {}: redirect {} -> {} ({:?})",
            self.record.id, response.url, request.url, decision
        );
        if reply.send(decision).is_err() {
            debug!("Exchange {}: adapter stopped waiting for redirect decision", self.record.id);
        }

        self.publish();
        Flow::Continue
    }

    fn on_challenge(&mut self, offer: ChallengeOffer) -> Flow {
        let ChallengeOffer { challenge, reply } = offer;

        let disposition = self.policy.server_trust.disposition(&challenge);
        debug!(
            "Exchange {}: {:?} challenge from {} answered with {:?}",
            self.record.id,
            challenge.protection_space.method,
            challenge.protection_space.host,
            disposition
        );
        if reply.send(disposition).is_err() {
            debug!("Exchange {}: adapter stopped waiting for challenge disposition", self.record.id);
        }

        Flow::Continue
    }

    fn on_completed(&mut self) -> Flow {
        self.finalize(ExchangeState::Completed);

        let relayed = self.relay.on_finish();
        self.check_relay("finish", relayed);

        self.publish();
        self.teardown();
        Flow::Terminal
    }

    fn on_failed(&mut self, error: TransportError) -> Flow {
        self.record.error_description = Some(error.description.clone());
        self.finalize(ExchangeState::Failed);

        let relayed = self.relay.on_failure(&error);
        self.check_relay("failure", relayed);

        self.publish();
        self.teardown();
        Flow::Terminal
    }

    /// Timing, request body capture and terminal state
    fn finalize(&mut self, state: ExchangeState) {
        self.record.finish(Utc::now());

        if let Some(tap) = &self.body_tap {
            let (captured, truncated) = tap.snapshot();
            self.record.request.body = Some(captured);
            self.record.request.body_truncated = truncated;
        }

        self.set_state(state);

        let duration = self.record.duration.unwrap_or_default();
        metrics::histogram!(EXCHANGE_DURATION).record(duration.as_secs_f64());
        let counter = match state {
            ExchangeState::Completed => EXCHANGES_COMPLETED,
            ExchangeState::Failed => EXCHANGES_FAILED,
            _ => EXCHANGES_CANCELLED,
        };
        metrics::counter!(counter).increment(1);

        info!(
            "Exchange {} {} in {:?} ({} bytes)",
            self.record.id,
            state.as_str(),
            duration,
            self.record.body().len()
        );
    }

    fn set_state(&mut self, state: ExchangeState) {
        self.state = state;
        self.record.state = state;
    }

    fn check_relay(&self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("Exchange {}: relay of {} failed: {}", self.record.id, what, e);
        }
    }

    fn publish(&self) {
        if let Err(e) = self.recorder.save_request(self.record.clone()) {
            warn!("Exchange {}: recorder rejected snapshot: {}", self.record.id, e);
        }
    }

    fn teardown(&mut self) {
        self.adapter = None;
        self.body_tap = None;
        self.request = None;
    }
}

impl Drop for ExchangeSession {
    fn drop(&mut self) {
        if let Some(adapter) = self.adapter.as_mut() {
            debug!("Exchange {}: dropped while in flight, cancelling", self.record.id);
            adapter.cancel();
        }
    }
}
