// packages/engine/src/interception/scripted.rs
//! Scripted transport
//!
//! Deterministic [`Transport`] that replays a fixed list of steps. Used to
//! exercise sessions without a network and to benchmark the relay path.
//! A [`ScriptProbe`] shared with every adapter observes what the session
//! did: opened requests, cancellations, redirect and challenge replies.

use crate::interception::request::{ByteStream, OutboundRequest, RequestBody};
use crate::interception::transport::{
    AuthChallenge, ChallengeDisposition, ChallengeOffer, RedirectDecision, RedirectOffer,
    Transport, TransportAdapter, TransportError, TransportEvent,
};
use crate::recording::record::{RequestSnapshot, ResponseSnapshot};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// One step of a script
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Headers(ResponseSnapshot),
    Data(Bytes),
    Redirect {
        request: RequestSnapshot,
        response: ResponseSnapshot,
    },
    Challenge(AuthChallenge),
    Complete,
    Fail(TransportError),

    /// Never yields; the adapter waits here until cancelled
    Hang,
}

impl ScriptStep {
    pub fn data(bytes: &'static [u8]) -> Self {
        ScriptStep::Data(Bytes::from_static(bytes))
    }

    pub fn fail(description: &str) -> Self {
        ScriptStep::Fail(TransportError::network(description))
    }

    /// Build a response snapshot from literal header pairs
    ///
    /// Pairs that are not valid header names or values are skipped.
    pub fn response(url: &str, status: u16, headers: &[(&str, &str)]) -> ResponseSnapshot {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        ResponseSnapshot::new(url, status, &map)
    }
}

/// Reply the session sent back to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Redirect(RedirectDecision),
    Challenge(ChallengeDisposition),
}

/// Observations shared by a scripted transport and its adapters
#[derive(Debug, Default)]
pub struct ScriptProbe {
    cancels: AtomicUsize,
    opened: Mutex<Vec<OutboundRequest>>,
    replies: Mutex<Vec<ScriptReply>>,
    sent_bodies: Mutex<Vec<Bytes>>,
}

impl ScriptProbe {
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Requests handed to `open`, in order
    pub fn opened(&self) -> Vec<OutboundRequest> {
        self.opened.lock().clone()
    }

    pub fn replies(&self) -> Vec<ScriptReply> {
        self.replies.lock().clone()
    }

    /// Streamed request bodies drained by adapters
    pub fn sent_bodies(&self) -> Vec<Bytes> {
        self.sent_bodies.lock().clone()
    }
}

/// Transport replaying the same script for every opened request
pub struct ScriptedTransport {
    steps: Vec<ScriptStep>,
    probe: Arc<ScriptProbe>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            probe: Arc::new(ScriptProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<ScriptProbe> {
        Arc::clone(&self.probe)
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, request: OutboundRequest) -> Box<dyn TransportAdapter> {
        let body = match &request.body {
            RequestBody::Stream(stream) => stream.take(),
            _ => None,
        };
        self.probe.opened.lock().push(request);

        Box::new(ScriptedAdapter {
            steps: self.steps.iter().cloned().collect(),
            probe: Arc::clone(&self.probe),
            body,
            pending: None,
            cancelled: false,
        })
    }
}

enum PendingReply {
    Redirect(oneshot::Receiver<RedirectDecision>),
    Challenge(oneshot::Receiver<ChallengeDisposition>),
}

struct ScriptedAdapter {
    steps: VecDeque<ScriptStep>,
    probe: Arc<ScriptProbe>,
    body: Option<ByteStream>,
    pending: Option<PendingReply>,
    cancelled: bool,
}

impl ScriptedAdapter {
    fn collect_reply(&mut self) {
        let reply = match self.pending.take() {
            Some(PendingReply::Redirect(mut rx)) => rx.try_recv().ok().map(ScriptReply::Redirect),
            Some(PendingReply::Challenge(mut rx)) => {
                rx.try_recv().ok().map(ScriptReply::Challenge)
            }
            None => None,
        };
        if let Some(reply) = reply {
            self.probe.replies.lock().push(reply);
        }
    }

    async fn send_body(&mut self) {
        if let Some(mut body) = self.body.take() {
            let mut sent = BytesMut::new();
            while let Some(Ok(chunk)) = body.next().await {
                sent.extend_from_slice(&chunk);
            }
            self.probe.sent_bodies.lock().push(sent.freeze());
        }
    }
}

#[async_trait]
impl TransportAdapter for ScriptedAdapter {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.collect_reply();
        if self.cancelled {
            return None;
        }
        self.send_body().await;

        match self.steps.pop_front()? {
            ScriptStep::Headers(response) => Some(TransportEvent::Headers(response)),
            ScriptStep::Data(chunk) => Some(TransportEvent::Data(chunk)),
            ScriptStep::Redirect { request, response } => {
                let (reply, rx) = oneshot::channel();
                self.pending = Some(PendingReply::Redirect(rx));
                Some(TransportEvent::Redirect(RedirectOffer {
                    request,
                    response,
                    reply,
                }))
            }
            ScriptStep::Challenge(challenge) => {
                let (reply, rx) = oneshot::channel();
                self.pending = Some(PendingReply::Challenge(rx));
                Some(TransportEvent::AuthChallenge(ChallengeOffer { challenge, reply }))
            }
            ScriptStep::Complete => Some(TransportEvent::Completed),
            ScriptStep::Fail(error) => Some(TransportEvent::Failed(error)),
            ScriptStep::Hang => {
                futures::future::pending::<()>().await;
                None
            }
        }
    }

    fn cancel(&mut self) {
        self.collect_reply();
        self.cancelled = true;
        self.steps.clear();
        self.probe.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;

    #[tokio::test]
    async fn test_replays_steps_in_order() {
        let transport = ScriptedTransport::new(vec![
            ScriptStep::Headers(ScriptStep::response("http://a.test/", 200, &[])),
            ScriptStep::data(b"chunk"),
            ScriptStep::Complete,
        ]);
        let mut adapter = transport.open(OutboundRequest::get(Uri::from_static("http://a.test/")));

        assert_eq!(adapter.next_event().await.map(|e| e.kind()), Some("headers"));
        assert_eq!(adapter.next_event().await.map(|e| e.kind()), Some("data"));
        assert_eq!(adapter.next_event().await.map(|e| e.kind()), Some("completed"));
        assert!(adapter.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let transport = ScriptedTransport::new(vec![ScriptStep::Complete]);
        let probe = transport.probe();
        let mut adapter = transport.open(OutboundRequest::get(Uri::from_static("http://a.test/")));

        adapter.cancel();
        assert!(adapter.next_event().await.is_none());
        assert_eq!(probe.cancel_count(), 1);
    }

    #[test]
    fn test_response_helper_skips_invalid_pairs() {
        let response = ScriptStep::response(
            "http://a.test/",
            200,
            &[("content-type", "text/html; charset=utf-8"), ("bad name", "x")],
        );
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.mime_type.as_deref(), Some("text/html"));
    }
}
