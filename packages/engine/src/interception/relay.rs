// packages/engine/src/interception/relay.rs
//! Relay to the original caller
//!
//! A [`RelayChannel`] stands in for whoever issued the intercepted request.
//! Every transport event is forwarded exactly once, in arrival order, with
//! the payload untouched. Relay failures are reported to the session, which
//! logs them and carries on with capture.

use crate::interception::request::CacheStorageHint;
use crate::interception::transport::{RedirectDecision, TransportError};
use crate::recording::record::{RequestSnapshot, ResponseSnapshot};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

/// Receiver of relayed exchange events
pub trait RelayChannel: Send + Sync {
    fn on_headers(&self, response: &ResponseSnapshot, hint: CacheStorageHint) -> Result<()>;

    fn on_data(&self, chunk: &Bytes) -> Result<()>;

    fn on_redirect(&self, request: &RequestSnapshot, response: &ResponseSnapshot) -> Result<()>;

    fn on_failure(&self, error: &TransportError) -> Result<()>;

    fn on_finish(&self) -> Result<()>;

    /// Consulted only under the caller-decides redirect strategy
    fn redirect_decision(
        &self,
        _request: &RequestSnapshot,
        _response: &ResponseSnapshot,
    ) -> RedirectDecision {
        RedirectDecision::Follow
    }
}

/// Owned copy of a relayed event
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Headers {
        response: ResponseSnapshot,
        hint: CacheStorageHint,
    },
    Data(Bytes),
    Redirect {
        request: RequestSnapshot,
        response: ResponseSnapshot,
    },
    Failure(TransportError),
    Finish,
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Failure(_) | RelayEvent::Finish)
    }
}

/// Relay that forwards events into an unbounded channel
///
/// Sending never waits, so a slow caller cannot stall the session or its
/// bookkeeping. The transport's event channel is bounded, but this one is
/// not: a caller that reads slower than the network delivers lets relayed
/// chunks accumulate here, up to the full response size.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<RelayEvent>,
    redirect_decision: RedirectDecision,
}

impl ChannelRelay {
    /// Create a relay and the receiving end handed to the caller
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                redirect_decision: RedirectDecision::Follow,
            },
            rx,
        )
    }

    /// Answer given to caller-decides redirect prompts
    pub fn with_redirect_decision(mut self, decision: RedirectDecision) -> Self {
        self.redirect_decision = decision;
        self
    }

    fn send(&self, event: RelayEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| EngineError::RelayFailed("caller is no longer listening".to_string()))
    }
}

impl RelayChannel for ChannelRelay {
    fn on_headers(&self, response: &ResponseSnapshot, hint: CacheStorageHint) -> Result<()> {
        self.send(RelayEvent::Headers {
            response: response.clone(),
            hint,
        })
    }

    fn on_data(&self, chunk: &Bytes) -> Result<()> {
        self.send(RelayEvent::Data(chunk.clone()))
    }

    fn on_redirect(&self, request: &RequestSnapshot, response: &ResponseSnapshot) -> Result<()> {
        self.send(RelayEvent::Redirect {
            request: request.clone(),
            response: response.clone(),
        })
    }

    fn on_failure(&self, error: &TransportError) -> Result<()> {
        self.send(RelayEvent::Failure(error.clone()))
    }

    fn on_finish(&self) -> Result<()> {
        self.send(RelayEvent::Finish)
    }

    fn redirect_decision(
        &self,
        _request: &RequestSnapshot,
        _response: &ResponseSnapshot,
    ) -> RedirectDecision {
        self.redirect_decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_forwarded_in_order() {
        let (relay, mut rx) = ChannelRelay::new();

        relay.on_data(&Bytes::from_static(b"a")).unwrap();
        relay.on_data(&Bytes::from_static(b"b")).unwrap();
        relay.on_finish().unwrap();

        assert_eq!(rx.try_recv().unwrap(), RelayEvent::Data(Bytes::from_static(b"a")));
        assert_eq!(rx.try_recv().unwrap(), RelayEvent::Data(Bytes::from_static(b"b")));
        assert!(rx.try_recv().unwrap().is_terminal());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_caller_dropped_fails() {
        let (relay, rx) = ChannelRelay::new();
        drop(rx);

        let result = relay.on_finish();
        assert!(matches!(result, Err(EngineError::RelayFailed(_))));
    }
}
