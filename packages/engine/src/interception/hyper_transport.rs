// packages/engine/src/interception/hyper_transport.rs
//! Hyper transport
//!
//! Issues marked requests over a pooled hyper client with rustls and turns
//! the response into [`TransportEvent`]s. Each opened call runs as its own
//! task feeding a bounded channel; the adapter side reads that channel.
//!
//! Redirects are resolved here and offered to the session before being
//! followed. A `401` carrying `WWW-Authenticate` is offered as an auth
//! challenge. Server trust is enforced inside the TLS verifier.

use crate::interception::request::{OutboundRequest, RequestBody};
use crate::interception::tls_handler::{self, ServerTrustPolicy};
use crate::interception::transport::{
    AuthChallenge, ChallengeDisposition, ChallengeOffer, RedirectDecision, RedirectOffer,
    Transport, TransportAdapter, TransportError, TransportErrorKind, TransportEvent,
};
use crate::recording::record::{RequestSnapshot, ResponseSnapshot};
use crate::utils::config::TransportConfig;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, TRANSFER_ENCODING,
    WWW_AUTHENTICATE,
};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::error::Error as StdError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Body type sent upstream
pub type OutboundBody = UnsyncBoxBody<Bytes, std::io::Error>;

type HttpsClient = Client<HttpsConnector<HttpConnector>, OutboundBody>;

/// Transport backed by a pooled hyper client
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpsClient,
    config: TransportConfig,
}

impl HyperTransport {
    pub fn new(config: TransportConfig, trust: ServerTrustPolicy) -> Result<Self> {
        let tls = tls_handler::client_config(trust)?;

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build(connector);

        info!(
            "Hyper transport ready (max {} redirects, trust policy {:?})",
            config.max_redirects, trust
        );

        Ok(Self { client, config })
    }

    /// Send a request without capture and return the raw response
    pub async fn forward(&self, request: OutboundRequest) -> Result<Response<Incoming>> {
        let outbound = build_request(&request)?;
        self.client
            .request(outbound)
            .await
            .map_err(|e| EngineError::TransportFailed(describe(&e)))
    }
}

impl Transport for HyperTransport {
    fn open(&self, request: OutboundRequest) -> Box<dyn TransportAdapter> {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let cancel = CancellationToken::new();

        let call = Call {
            client: self.client.clone(),
            tx,
            max_redirects: self.config.max_redirects,
        };
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Transport call cancelled"),
                _ = call.run(request) => {}
            }
        });

        Box::new(HyperAdapter {
            events: rx,
            cancel,
            task: Some(task),
        })
    }
}

/// One in-flight call, including the redirects it follows
struct Call {
    client: HttpsClient,
    tx: mpsc::Sender<TransportEvent>,
    max_redirects: usize,
}

impl Call {
    async fn run(self, request: OutboundRequest) {
        let terminal = match self.drive(request).await {
            Ok(()) => TransportEvent::Completed,
            Err(error) => {
                debug!("Transport call failed: {}", error);
                TransportEvent::Failed(error)
            }
        };
        let _ = self.tx.send(terminal).await;
    }

    async fn drive(&self, mut current: OutboundRequest) -> std::result::Result<(), TransportError> {
        let mut hops = 0usize;

        loop {
            let url = current.uri.to_string();
            let replay = match &current.body {
                RequestBody::Buffered(bytes) => Some(bytes.clone()),
                _ => None,
            };

            let response = self
                .client
                .request(build_request(&current)?)
                .await
                .map_err(|e| classify(&e))?;
            let status = response.status();
            let snapshot = ResponseSnapshot::new(url.clone(), status.as_u16(), response.headers());

            if let Some(next) = redirect_target(&current, &response, replay)? {
                if hops >= self.max_redirects {
                    return Err(TransportError::new(
                        TransportErrorKind::Protocol,
                        format!("too many redirects (limit {})", self.max_redirects),
                    ));
                }
                hops += 1;

                let (reply, decision) = oneshot::channel();
                self.emit(TransportEvent::Redirect(RedirectOffer {
                    request: RequestSnapshot::capture(&next),
                    response: snapshot.clone(),
                    reply,
                }))
                .await?;

                if let Ok(RedirectDecision::Follow) = decision.await {
                    debug!("Following redirect {} -> {}", url, next.uri);
                    current = next;
                    continue;
                }
            }

            if status == StatusCode::UNAUTHORIZED {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .map(|value| {
                        AuthChallenge::from_www_authenticate(
                            current.uri.host().unwrap_or_default(),
                            port_of(&current.uri),
                            value,
                        )
                    });

                if let Some(challenge) = challenge {
                    let (reply, disposition) = oneshot::channel();
                    self.emit(TransportEvent::AuthChallenge(ChallengeOffer { challenge, reply }))
                        .await?;

                    if let Ok(ChallengeDisposition::CancelChallenge) = disposition.await {
                        return Err(TransportError::new(
                            TransportErrorKind::Protocol,
                            "authentication challenge cancelled",
                        ));
                    }
                }
            }

            self.emit(TransportEvent::Headers(snapshot)).await?;

            let mut body = response.into_body();
            while let Some(frame) = body.frame().await {
                let frame = frame.map_err(|e| TransportError::network(describe(&e)))?;
                if let Ok(data) = frame.into_data() {
                    if !data.is_empty() {
                        self.emit(TransportEvent::Data(data)).await?;
                    }
                }
            }

            return Ok(());
        }
    }

    async fn emit(&self, event: TransportEvent) -> std::result::Result<(), TransportError> {
        self.tx.send(event).await.map_err(|_| TransportError::closed())
    }
}

/// Adapter reading events produced by a [`Call`] task
struct HyperAdapter {
    events: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl TransportAdapter for HyperAdapter {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HyperAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn build_request(request: &OutboundRequest) -> std::result::Result<Request<OutboundBody>, TransportError> {
    let body = match &request.body {
        RequestBody::Empty => empty_body(),
        RequestBody::Buffered(bytes) => Full::new(bytes.clone())
            .map_err(|never| match never {})
            .boxed_unsync(),
        RequestBody::Stream(stream) => match stream.take() {
            Some(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
            None => {
                warn!("Streamed body for {} already consumed, sending empty body", request.uri);
                empty_body()
            }
        },
    };

    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(request.uri.clone());
    if let Some(headers) = builder.headers_mut() {
        *headers = request.headers.clone();
    }

    builder.body(body).map_err(|e| {
        TransportError::new(TransportErrorKind::Protocol, format!("invalid request: {}", e))
    })
}

fn empty_body() -> OutboundBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Resolve the follow-up request for a redirect response, if any
fn redirect_target(
    current: &OutboundRequest,
    response: &Response<Incoming>,
    replay: Option<Bytes>,
) -> std::result::Result<Option<OutboundRequest>, TransportError> {
    let status = response.status();
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return Ok(None);
    }
    let Some(location) = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    let invalid = |e: &dyn std::fmt::Display| {
        TransportError::new(
            TransportErrorKind::Protocol,
            format!("invalid redirect location {}: {}", location, e),
        )
    };
    let base = Url::parse(&current.uri.to_string()).map_err(|e| invalid(&e))?;
    let target = base.join(location).map_err(|e| invalid(&e))?;
    let uri = target.as_str().parse::<Uri>().map_err(|e| invalid(&e))?;

    let cross_origin =
        uri.scheme() != current.uri.scheme() || uri.authority() != current.uri.authority();

    let mut next = current.clone();
    next.uri = uri;
    next.headers.remove(HOST);
    if cross_origin {
        next.headers.remove(AUTHORIZATION);
    }

    let becomes_get = (status == StatusCode::SEE_OTHER && current.method != Method::HEAD)
        || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
            && current.method == Method::POST);

    if becomes_get {
        next.method = Method::GET;
        next.body = RequestBody::Empty;
        next.headers.remove(CONTENT_LENGTH);
        next.headers.remove(CONTENT_TYPE);
        next.headers.remove(TRANSFER_ENCODING);
    } else {
        next.body = match replay {
            Some(bytes) => RequestBody::Buffered(bytes),
            None if matches!(current.body, RequestBody::Stream(_)) => {
                // A consumed stream cannot be resent; the 3xx becomes the final response
                warn!(
                    "Streamed body cannot be replayed to {}, not following {} redirect",
                    next.uri, status
                );
                return Ok(None);
            }
            None => RequestBody::Empty,
        };
    }

    Ok(Some(next))
}

fn port_of(uri: &Uri) -> u16 {
    uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    })
}

fn classify(err: &hyper_util::client::legacy::Error) -> TransportError {
    let kind = if is_tls_failure(err) {
        TransportErrorKind::Tls
    } else {
        TransportErrorKind::Network
    };
    TransportError::new(kind, describe(err))
}

fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(cause) = current {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.get_ref().map(|inner| inner.is::<rustls::Error>()).unwrap_or(false) {
                return true;
            }
        }
        current = cause.source();
    }
    false
}

/// Error message including its source chain
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut description = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !description.contains(&message) {
            description.push_str(": ");
            description.push_str(&message);
        }
        source = cause.source();
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::gate::InterceptGate;
    use crate::interception::transport::AuthMethod;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn route(
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let builder = Response::builder();
        let path = req.uri().path().to_string();
        let response = match path.as_str() {
            "/hello" => builder
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Full::new(Bytes::from_static(b"hello world"))),
            "/redirect" => builder
                .status(StatusCode::FOUND)
                .header(LOCATION, "/hello")
                .body(Full::new(Bytes::new())),
            "/temp" => builder
                .status(StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, "/echo")
                .body(Full::new(Bytes::new())),
            "/loop" => builder
                .status(StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, "/loop")
                .body(Full::new(Bytes::new())),
            "/auth" => builder
                .status(StatusCode::UNAUTHORIZED)
                .header(WWW_AUTHENTICATE, "Basic realm=\"test\"")
                .body(Full::new(Bytes::from_static(b"denied"))),
            "/echo" => {
                let method = req.method().to_string();
                let body = req.into_body().collect().await.unwrap().to_bytes();
                let mut echoed = format!("{} ", method).into_bytes();
                echoed.extend_from_slice(&body);
                builder.body(Full::new(Bytes::from(echoed)))
            }
            _ => builder
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::new())),
        };
        Ok(response.unwrap())
    }

    async fn spawn_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(route))
                        .await;
                });
            }
        });
        addr
    }

    fn transport() -> HyperTransport {
        HyperTransport::new(TransportConfig::default(), ServerTrustPolicy::default()).unwrap()
    }

    fn uri(addr: SocketAddr, path: &str) -> Uri {
        format!("http://{}{}", addr, path).parse().unwrap()
    }

    struct Outcome {
        headers: Vec<ResponseSnapshot>,
        redirects: Vec<RequestSnapshot>,
        challenges: Vec<AuthChallenge>,
        body: Vec<u8>,
        terminal: Option<TransportEvent>,
    }

    async fn collect(
        adapter: &mut Box<dyn TransportAdapter>,
        redirect: RedirectDecision,
        challenge: ChallengeDisposition,
    ) -> Outcome {
        let mut outcome = Outcome {
            headers: Vec::new(),
            redirects: Vec::new(),
            challenges: Vec::new(),
            body: Vec::new(),
            terminal: None,
        };
        while let Some(event) = adapter.next_event().await {
            match event {
                TransportEvent::Headers(response) => outcome.headers.push(response),
                TransportEvent::Data(chunk) => outcome.body.extend_from_slice(&chunk),
                TransportEvent::Redirect(offer) => {
                    outcome.redirects.push(offer.request);
                    let _ = offer.reply.send(redirect);
                }
                TransportEvent::AuthChallenge(offer) => {
                    outcome.challenges.push(offer.challenge);
                    let _ = offer.reply.send(challenge.clone());
                }
                terminal => {
                    outcome.terminal = Some(terminal);
                    break;
                }
            }
        }
        outcome
    }

    #[tokio::test]
    async fn test_streams_response() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/hello")));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert!(matches!(outcome.terminal, Some(TransportEvent::Completed)));
        assert_eq!(outcome.headers.len(), 1);
        assert_eq!(outcome.headers[0].status, 200);
        assert_eq!(outcome.headers[0].mime_type.as_deref(), Some("text/plain"));
        assert_eq!(outcome.headers[0].text_encoding.as_deref(), Some("utf-8"));
        assert_eq!(outcome.body, b"hello world");
    }

    #[tokio::test]
    async fn test_redirect_followed() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/redirect")));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.redirects.len(), 1);
        assert_eq!(outcome.redirects[0].url, format!("http://{}/hello", addr));
        assert_eq!(outcome.headers[0].status, 200);
        assert_eq!(outcome.headers[0].url, format!("http://{}/hello", addr));
        assert_eq!(outcome.body, b"hello world");
    }

    #[tokio::test]
    async fn test_redirect_declined_delivers_redirect_response() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/redirect")));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Stop,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert!(matches!(outcome.terminal, Some(TransportEvent::Completed)));
        assert_eq!(outcome.headers.len(), 1);
        assert_eq!(outcome.headers[0].status, 302);
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let addr = spawn_server().await;
        let config = TransportConfig {
            max_redirects: 2,
            ..TransportConfig::default()
        };
        let transport = HyperTransport::new(config, ServerTrustPolicy::default()).unwrap();
        let mut adapter = transport.open(OutboundRequest::get(uri(addr, "/loop")));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.redirects.len(), 2);
        match outcome.terminal {
            Some(TransportEvent::Failed(error)) => {
                assert_eq!(error.kind, TransportErrorKind::Protocol);
                assert!(error.description.contains("too many redirects"));
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_redirected_with_302_becomes_get() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(
            OutboundRequest::new(Method::POST, uri(addr, "/redirect")).with_body("payload"),
        );

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.redirects[0].method, "GET");
        assert!(outcome.redirects[0].body.is_none());
        assert_eq!(outcome.body, b"hello world");
    }

    #[tokio::test]
    async fn test_temporary_redirect_replays_buffered_body() {
        let current = InterceptGate::mark_as_internal(
            &OutboundRequest::new(Method::PUT, Uri::from_static("http://a.test/old"))
                .with_body("payload"),
        );
        let addr = spawn_server().await;
        let response = transport()
            .forward(OutboundRequest::get(uri(addr, "/loop")))
            .await
            .unwrap();

        let next = redirect_target(&current, &response, Some(Bytes::from_static(b"payload")))
            .unwrap()
            .unwrap();

        assert_eq!(next.method, Method::PUT);
        assert_eq!(next.uri, Uri::from_static("http://a.test/loop"));
        assert!(matches!(next.body, RequestBody::Buffered(ref b) if &b[..] == b"payload"));
        assert!(InterceptGate::is_internal(&next));
    }

    #[tokio::test]
    async fn test_temporary_redirect_with_buffered_body_followed() {
        let addr = spawn_server().await;
        let mut adapter = transport()
            .open(OutboundRequest::new(Method::POST, uri(addr, "/temp")).with_body("payload"));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.redirects.len(), 1);
        assert_eq!(outcome.redirects[0].method, "POST");
        assert_eq!(outcome.headers[0].status, 200);
        assert_eq!(outcome.body, b"POST payload");
    }

    #[tokio::test]
    async fn test_temporary_redirect_with_streamed_body_not_followed() {
        let addr = spawn_server().await;
        let request = OutboundRequest::new(Method::POST, uri(addr, "/temp"))
            .with_stream(futures::stream::iter(vec![Ok(Bytes::from_static(b"payload"))]));
        let mut adapter = transport().open(request);

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert!(matches!(outcome.terminal, Some(TransportEvent::Completed)));
        assert!(outcome.redirects.is_empty());
        assert_eq!(outcome.headers.len(), 1);
        assert_eq!(outcome.headers[0].status, 307);
        assert_eq!(outcome.headers[0].url, format!("http://{}/temp", addr));
        assert!(outcome.body.is_empty());
    }

    #[tokio::test]
    async fn test_redirect_target_refused_for_consumed_stream() {
        let current = OutboundRequest::new(Method::PUT, Uri::from_static("http://a.test/old"))
            .with_stream(futures::stream::iter(vec![Ok(Bytes::from_static(b"payload"))]));
        if let RequestBody::Stream(stream) = &current.body {
            assert!(stream.take().is_some());
        }
        let addr = spawn_server().await;
        let response = transport()
            .forward(OutboundRequest::get(uri(addr, "/temp")))
            .await
            .unwrap();

        assert!(redirect_target(&current, &response, None).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_buffered_body_sent() {
        let addr = spawn_server().await;
        let mut adapter = transport()
            .open(OutboundRequest::new(Method::PUT, uri(addr, "/echo")).with_body("payload"));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.body, b"PUT payload");
    }

    #[tokio::test]
    async fn test_streamed_body_sent() {
        let addr = spawn_server().await;
        let request = OutboundRequest::new(Method::POST, uri(addr, "/echo")).with_stream(
            futures::stream::iter(vec![
                Ok(Bytes::from_static(b"one ")),
                Ok(Bytes::from_static(b"two")),
            ]),
        );
        let mut adapter = transport().open(request);

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.body, b"POST one two");
    }

    #[tokio::test]
    async fn test_www_authenticate_offered_as_challenge() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/auth")));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        assert_eq!(outcome.challenges.len(), 1);
        let space = &outcome.challenges[0].protection_space;
        assert_eq!(space.method, AuthMethod::HttpBasic);
        assert_eq!(space.realm.as_deref(), Some("test"));
        assert_eq!(space.port, addr.port());
        assert_eq!(outcome.headers[0].status, 401);
        assert_eq!(outcome.body, b"denied");
    }

    #[tokio::test]
    async fn test_cancelled_challenge_fails() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/auth")));

        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::CancelChallenge,
        )
        .await;

        assert!(outcome.headers.is_empty());
        assert!(matches!(outcome.terminal, Some(TransportEvent::Failed(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/")));
        let outcome = collect(
            &mut adapter,
            RedirectDecision::Follow,
            ChallengeDisposition::PerformDefaultHandling,
        )
        .await;

        match outcome.terminal {
            Some(TransportEvent::Failed(error)) => {
                assert_eq!(error.kind, TransportErrorKind::Network);
                assert!(!error.description.is_empty());
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_ends_event_stream() {
        let addr = spawn_server().await;
        let mut adapter = transport().open(OutboundRequest::get(uri(addr, "/hello")));

        adapter.cancel();
        assert!(adapter.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_returns_raw_response() {
        let addr = spawn_server().await;
        let response = transport()
            .forward(OutboundRequest::get(uri(addr, "/hello")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello world");
    }

    #[test]
    fn test_describe_includes_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let outer = EngineError::Io(inner);
        assert!(describe(&outer).contains("reset by peer"));
    }
}
