// packages/engine/src/proxy/server.rs
//! Proxy server

use crate::interception::hyper_transport::HyperTransport;
use crate::interception::interceptor::{Dispatch, Interceptor};
use crate::interception::relay::{ChannelRelay, RelayEvent};
use crate::interception::request::{CachePolicy, OutboundRequest};
use crate::recording::record::ResponseSnapshot;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use futures::StreamExt;
use http::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION,
    TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use http::HeaderMap;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Body type returned to proxy clients
pub type ProxyBody = UnsyncBoxBody<Bytes, std::io::Error>;

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Plain-HTTP forward proxy
pub struct ProxyServer {
    interceptor: Arc<Interceptor>,
    transport: Arc<HyperTransport>,
}

impl ProxyServer {
    /// `transport` carries pass-through requests
    pub fn new(interceptor: Arc<Interceptor>, transport: Arc<HyperTransport>) -> Self {
        Self {
            interceptor,
            transport,
        }
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| EngineError::InterceptionFailed(format!("Failed to bind proxy: {}", e)))
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("Proxy listening on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Proxy shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let server = Arc::clone(&self);

                    tokio::spawn(async move {
                        debug!("Accepted connection from {}", addr);

                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move { server.handle_request(req).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>> {
        debug!("Proxy request: {} {}", req.method(), req.uri());

        if req.method() == Method::CONNECT {
            return Ok(plain_response(
                StatusCode::NOT_IMPLEMENTED,
                "CONNECT tunneling is not supported",
            ));
        }
        if req.uri().scheme().is_none() || req.uri().authority().is_none() {
            return Ok(plain_response(
                StatusCode::BAD_REQUEST,
                "proxy requests must use absolute-form URIs",
            ));
        }

        let request = to_outbound(req);
        let (relay, events) = ChannelRelay::new();

        match self.interceptor.dispatch(request, Arc::new(relay)) {
            Dispatch::PassThrough(request) => Ok(self.pass_through(request).await),
            Dispatch::Intercepted(handle) => {
                debug!("Exchange {} intercepted", handle.id());
                Ok(relay_response(events).await)
            }
        }
    }

    async fn pass_through(&self, request: OutboundRequest) -> Response<ProxyBody> {
        match self.transport.forward(request).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, body.map_err(std::io::Error::other).boxed_unsync())
            }
            Err(e) => {
                warn!("Pass-through request failed: {}", e);
                plain_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }
}

fn to_outbound(req: Request<Incoming>) -> OutboundRequest {
    let (parts, body) = req.into_parts();

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    let mut request = OutboundRequest::new(parts.method, parts.uri)
        .with_cache_policy(CachePolicy::from_headers(&headers));
    request.headers = headers;

    if !body.is_end_stream() {
        request = request.with_stream(
            body.into_data_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );
    }
    request
}

/// Wait for the response head, then stream the body from relay events
async fn relay_response(mut events: mpsc::UnboundedReceiver<RelayEvent>) -> Response<ProxyBody> {
    loop {
        match events.recv().await {
            Some(RelayEvent::Headers { response, .. }) => return streaming_response(response, events),
            Some(RelayEvent::Redirect { request, response }) => {
                debug!(
                    "Upstream redirected {} -> {} ({})",
                    response.url, request.url, response.status
                );
            }
            Some(RelayEvent::Data(chunk)) => {
                warn!("Dropping {} bytes relayed before response headers", chunk.len());
            }
            Some(RelayEvent::Failure(error)) => {
                return plain_response(StatusCode::BAD_GATEWAY, &error.description)
            }
            Some(RelayEvent::Finish) | None => {
                return plain_response(
                    StatusCode::BAD_GATEWAY,
                    "exchange ended before response headers",
                )
            }
        }
    }
}

fn streaming_response(
    head: ResponseSnapshot,
    events: mpsc::UnboundedReceiver<RelayEvent>,
) -> Response<ProxyBody> {
    let mut builder = Response::builder().status(head.status);
    for (name, value) in &head.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    let frames = futures::stream::unfold(events, |mut events| async move {
        loop {
            match events.recv().await? {
                RelayEvent::Data(chunk) => return Some((Ok(Frame::data(chunk)), events)),
                RelayEvent::Failure(error) => {
                    return Some((Err(std::io::Error::other(error.description)), events))
                }
                RelayEvent::Finish => return None,
                RelayEvent::Headers { .. } | RelayEvent::Redirect { .. } => continue,
            }
        }
    });

    builder
        .body(StreamBody::new(frames).boxed_unsync())
        .unwrap_or_else(|e| {
            plain_response(StatusCode::BAD_GATEWAY, &format!("invalid upstream response: {}", e))
        })
}

fn plain_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(message.to_string()))
        .map_err(|never| match never {})
        .boxed_unsync();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Remove hop-by-hop headers, including those named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
    headers.remove("keep-alive");
}
