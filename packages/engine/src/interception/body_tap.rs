// packages/engine/src/interception/body_tap.rs
//! Capture tap for streamed request bodies
//!
//! Wraps a body stream so the bytes flowing to the network are copied into a
//! bounded buffer shared with the session. Forwarded chunks are never
//! altered or delayed; once the cap is reached further bytes are only
//! counted as truncated.

use crate::interception::request::ByteStream;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Captured {
    buffer: BytesMut,
    truncated: bool,
}

/// Shared view of the bytes captured from a streamed body
#[derive(Debug, Clone)]
pub struct BodyTap {
    captured: Arc<Mutex<Captured>>,
    limit: usize,
}

impl BodyTap {
    /// Wrap `stream`, capturing at most `limit` bytes
    pub fn wrap(stream: ByteStream, limit: usize) -> (ByteStream, BodyTap) {
        let tap = BodyTap {
            captured: Arc::new(Mutex::new(Captured::default())),
            limit,
        };

        let sink = tap.clone();
        let tapped = stream
            .inspect_ok(move |chunk| sink.record(chunk))
            .boxed();

        (tapped, tap)
    }

    fn record(&self, chunk: &Bytes) {
        let mut captured = self.captured.lock();
        let room = self.limit.saturating_sub(captured.buffer.len());

        if chunk.len() > room {
            captured.truncated = true;
        }
        captured.buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Bytes captured so far and whether any were dropped
    pub fn snapshot(&self) -> (Bytes, bool) {
        let captured = self.captured.lock();
        (Bytes::copy_from_slice(&captured.buffer), captured.truncated)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
