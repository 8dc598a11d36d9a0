// packages/engine/src/recording/record.rs
//! Captured exchange data
//!
//! One [`ExchangeRecord`] exists per admitted request. It is mutated only by
//! the session that owns it and is handed to the recorder as snapshots; once
//! `finished_at` is set the record no longer changes.

use crate::interception::request::{OutboundRequest, RequestBody};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

/// Lifecycle state of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Created,
    Started,
    HeadersReceived,
    Completed,
    Failed,
    Cancelled,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeState::Completed | ExchangeState::Failed | ExchangeState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeState::Created => "created",
            ExchangeState::Started => "started",
            ExchangeState::HeadersReceived => "headers_received",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed => "failed",
            ExchangeState::Cancelled => "cancelled",
        }
    }
}

/// Flatten a header map into ordered name/value pairs
///
/// Non-UTF-8 values are converted lossily.
pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Request metadata captured at the start of an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,

    /// Request body; streamed bodies are filled in at finalization
    pub body: Option<Bytes>,

    /// Set when a streamed body exceeded the capture cap
    pub body_truncated: bool,
}

impl RequestSnapshot {
    /// Capture method, URL, headers and any buffered body
    pub fn capture(request: &OutboundRequest) -> Self {
        let body = match &request.body {
            RequestBody::Buffered(bytes) => Some(bytes.clone()),
            RequestBody::Empty | RequestBody::Stream(_) => None,
        };

        Self {
            method: request.method.as_str().to_string(),
            url: request.uri.to_string(),
            headers: header_pairs(&request.headers),
            body,
            body_truncated: false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response metadata, set once when headers arrive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,

    /// Media type without parameters, e.g. `text/plain`
    pub mime_type: Option<String>,

    /// `charset` parameter of the content type
    pub text_encoding: Option<String>,

    pub expected_content_length: Option<u64>,
}

impl ResponseSnapshot {
    pub fn new(url: impl Into<String>, status: u16, headers: &HeaderMap) -> Self {
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let (mime_type, text_encoding) = content_type.map(parse_content_type).unwrap_or((None, None));

        let expected_content_length = headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            url: url.into(),
            status,
            headers: header_pairs(headers),
            mime_type,
            text_encoding,
            expected_content_length,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn parse_content_type(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.split(';');

    let mime = parts
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());

    let charset = parts.find_map(|p| {
        let (key, val) = p.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(val.trim().trim_matches('"').to_string())
        } else {
            None
        }
    });

    (mime, charset)
}

/// One redirect relayed during an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub status: u16,
    pub from: String,
    pub to: String,
}

/// Snapshot of one request/response lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Unique exchange ID (ULID)
    pub id: String,

    pub state: ExchangeState,

    pub request: RequestSnapshot,

    pub response: Option<ResponseSnapshot>,

    /// Response body in arrival order; `None` until the first chunk
    pub response_body: Option<BytesMut>,

    pub redirects: Vec<RedirectHop>,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// `finished_at - started_at`; `None` until the exchange finishes
    pub duration: Option<Duration>,

    /// Failure description, verbatim from the transport
    pub error_description: Option<String>,
}

impl ExchangeRecord {
    pub fn new(request: RequestSnapshot) -> Self {
        Self {
            id: Ulid::new().to_string(),
            state: ExchangeState::Created,
            request,
            response: None,
            response_body: None,
            redirects: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            duration: None,
            error_description: None,
        }
    }

    /// Store the response snapshot; the first call wins
    pub(crate) fn set_response(&mut self, response: ResponseSnapshot) -> bool {
        if self.response.is_some() {
            return false;
        }
        self.response = Some(response);
        true
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) {
        match self.response_body.as_mut() {
            Some(buffer) => buffer.extend_from_slice(chunk),
            None => self.response_body = Some(BytesMut::from(chunk)),
        }
    }

    /// Set `finished_at` and `duration`; later calls are ignored
    pub(crate) fn finish(&mut self, at: DateTime<Utc>) {
        if self.finished_at.is_some() {
            return;
        }
        self.finished_at = Some(at);
        self.duration = Some((at - self.started_at).to_std().unwrap_or_default());
    }

    /// Captured response body, empty before the first chunk
    pub fn body(&self) -> &[u8] {
        self.response_body.as_deref().unwrap_or(&[])
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}
