// packages/engine/src/interception/gate.rs
//! Admission gate
//!
//! Decides whether an outbound request is captured. The engine re-issues
//! every admitted request through its own transport; that re-issued clone
//! carries an [`InterceptMarker`] so it is refused when it re-enters the
//! host's dispatch path, which is what stops the engine from capturing its
//! own traffic recursively.

use crate::interception::host_filter::HostFilter;
use crate::interception::request::OutboundRequest;
use tracing::debug;

/// Reserved key identifying engine-issued requests
pub const INTERNAL_MARKER_KEY: &str = "wiretap.internal";

/// Immutable tag carried by engine-issued requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptMarker {
    key: &'static str,
}

impl InterceptMarker {
    pub const INTERNAL: InterceptMarker = InterceptMarker {
        key: INTERNAL_MARKER_KEY,
    };

    pub fn key(&self) -> &'static str {
        self.key
    }
}

/// Admission predicate plus optional host ignore list
#[derive(Debug, Clone, Default)]
pub struct InterceptGate {
    ignored: HostFilter,
}

impl InterceptGate {
    /// Gate that admits every unmarked request
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that additionally passes through requests to ignored hosts
    pub fn with_filter(ignored: HostFilter) -> Self {
        Self { ignored }
    }

    /// Whether `request` should be captured
    ///
    /// Marked requests are always refused; the host filter is only consulted
    /// for unmarked ones.
    pub fn should_intercept(&self, request: &OutboundRequest) -> bool {
        if Self::is_internal(request) {
            debug!("Refusing engine-issued request {} {}", request.method, request.uri);
            return false;
        }

        if let Some(host) = request.host() {
            if self.ignored.matches(&host) {
                return false;
            }
        }

        true
    }

    /// Whether `request` carries the internal marker
    pub fn is_internal(request: &OutboundRequest) -> bool {
        request
            .marker()
            .map(|m| m.key() == INTERNAL_MARKER_KEY)
            .unwrap_or(false)
    }

    /// Copy of `request` carrying the internal marker
    ///
    /// Applied to the clone used for the real network call, never to the
    /// caller's original.
    pub fn mark_as_internal(request: &OutboundRequest) -> OutboundRequest {
        let mut marked = request.clone();
        marked.set_marker(InterceptMarker::INTERNAL);
        marked
    }

    /// Request used for admission testing; returned unmodified
    pub fn canonical_request(request: OutboundRequest) -> OutboundRequest {
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;

    fn request(uri: &'static str) -> OutboundRequest {
        OutboundRequest::get(Uri::from_static(uri))
    }

    #[test]
    fn test_unmarked_request_admitted() {
        let gate = InterceptGate::new();
        assert!(gate.should_intercept(&request("http://example.com/a")));
    }

    #[test]
    fn test_marked_clone_refused() {
        let gate = InterceptGate::new();
        let original = request("http://example.com/a");

        let marked = InterceptGate::mark_as_internal(&original);

        assert!(gate.should_intercept(&original));
        assert!(!gate.should_intercept(&marked));
        assert!(original.marker().is_none());
    }

    #[test]
    fn test_marking_is_idempotent() {
        let gate = InterceptGate::new();
        let once = InterceptGate::mark_as_internal(&request("http://example.com/a"));
        let twice = InterceptGate::mark_as_internal(&once);

        assert!(!gate.should_intercept(&twice));
        assert_eq!(once.marker(), twice.marker());
    }

    #[test]
    fn test_canonical_request_unmodified() {
        let original = request("http://example.com/a?b=c");
        let canonical = InterceptGate::canonical_request(original.clone());

        assert_eq!(canonical.uri, original.uri);
        assert_eq!(canonical.method, original.method);
        assert_eq!(canonical.headers, original.headers);
    }

    #[test]
    fn test_ignored_host_passes_through() {
        let gate = InterceptGate::with_filter(HostFilter::from_patterns(["*.internal.test"]));

        assert!(!gate.should_intercept(&request("http://svc.internal.test/")));
        assert!(gate.should_intercept(&request("http://example.com/")));
    }
}
