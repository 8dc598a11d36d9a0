// packages/engine/src/interception/request.rs
//! Outbound request model
//!
//! An owned, cloneable request as handed to the interception engine by the
//! host's dispatch path. Clones share a streamed body, which can be taken
//! exactly once by whichever transport actually sends it.

use crate::interception::gate::InterceptMarker;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use http::header::{CACHE_CONTROL, HOST, PRAGMA};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Streamed body chunks
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Take-once handle to a streamed request body
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl BodyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(stream.boxed()))),
        }
    }

    /// Take the stream; `None` once it has been taken by any clone
    pub fn take(&self) -> Option<ByteStream> {
        self.inner.lock().take()
    }

    pub fn is_taken(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("taken", &self.is_taken())
            .finish()
    }
}

/// Request body
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,

    /// Pre-materialized body, captured in full
    Buffered(Bytes),

    /// Streamed body, captured through a tap up to a byte cap
    Stream(BodyStream),
}

/// Cache policy requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    UseProtocolDefault,
    ReloadIgnoringLocal,
    ReturnCacheElseLoad,
    ReturnCacheDontLoad,
    ReloadIgnoringAll,
    ReloadRevalidating,
}

impl CachePolicy {
    /// Derive the policy from `Cache-Control` and `Pragma` request headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let directives: Vec<String> = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();

        let has = |name: &str| directives.iter().any(|d| d == name);

        if has("only-if-cached") {
            CachePolicy::ReturnCacheDontLoad
        } else if has("no-store") {
            CachePolicy::ReloadIgnoringAll
        } else if has("no-cache") || pragma_no_cache(headers) {
            CachePolicy::ReloadIgnoringLocal
        } else if has("max-age=0") {
            CachePolicy::ReloadRevalidating
        } else if directives.iter().any(|d| d.starts_with("max-stale")) {
            CachePolicy::ReturnCacheElseLoad
        } else {
            CachePolicy::UseProtocolDefault
        }
    }

    /// Storage hint relayed alongside response headers
    ///
    /// Policies without a storage counterpart fall back to `NotAllowed`.
    pub fn storage_hint(self) -> CacheStorageHint {
        match self {
            CachePolicy::UseProtocolDefault => CacheStorageHint::Allowed,
            CachePolicy::ReloadIgnoringLocal => CacheStorageHint::AllowedInMemoryOnly,
            CachePolicy::ReturnCacheElseLoad => CacheStorageHint::NotAllowed,
            _ => CacheStorageHint::NotAllowed,
        }
    }
}

fn pragma_no_cache(headers: &HeaderMap) -> bool {
    headers
        .get(PRAGMA)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("no-cache"))
        .unwrap_or(false)
}

/// Caching hint handed to the original caller with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStorageHint {
    Allowed,
    AllowedInMemoryOnly,
    NotAllowed,
}

/// A request travelling through the interception engine
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub cache_policy: CachePolicy,
    marker: Option<InterceptMarker>,
}

impl OutboundRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            cache_policy: CachePolicy::default(),
            marker: None,
        }
    }

    /// Shorthand for a bodiless GET
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    pub fn with_stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        self.body = RequestBody::Stream(BodyStream::new(stream));
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Marker attached by the gate, if this is an engine-issued request
    pub fn marker(&self) -> Option<&InterceptMarker> {
        self.marker.as_ref()
    }

    pub(crate) fn set_marker(&mut self, marker: InterceptMarker) {
        self.marker = Some(marker);
    }

    /// Target host from the URI, falling back to the `Host` header
    pub fn host(&self) -> Option<String> {
        if let Some(host) = self.uri.host() {
            return Some(host.to_ascii_lowercase());
        }

        self.headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.split(':').next())
            .map(|h| h.to_ascii_lowercase())
    }
}
