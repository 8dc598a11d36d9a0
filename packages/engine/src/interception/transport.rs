// packages/engine/src/interception/transport.rs
//! Transport adapter contract
//!
//! A [`Transport`] opens one [`TransportAdapter`] per exchange. The adapter
//! owns the real network call for the marked clone and exposes it as an
//! ordered, cancellable event stream:
//!
//! ```text
//! [Redirect | AuthChallenge]* → Headers → Data* → (Completed | Failed)
//! ```
//!
//! Adapters guarantee at most one `Headers` before any `Data`, strictly
//! ordered `Data`, and exactly one terminal event. After `cancel` the
//! adapter yields no further events.

use crate::interception::request::OutboundRequest;
use crate::recording::record::{RequestSnapshot, ResponseSnapshot};
use crate::utils::errors::EngineError;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

/// Opens network calls
pub trait Transport: Send + Sync {
    /// Start the call for `request` (already marked as internal)
    fn open(&self, request: OutboundRequest) -> Box<dyn TransportAdapter>;
}

/// One in-flight network call
#[async_trait]
pub trait TransportAdapter: Send {
    /// Next event, or `None` once the call is over or cancelled
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Cancel the in-flight call
    fn cancel(&mut self);
}

/// Events produced by a transport adapter
#[derive(Debug)]
pub enum TransportEvent {
    /// Response headers received
    Headers(ResponseSnapshot),

    /// One chunk of response body
    Data(Bytes),

    /// The server offered a redirect; the adapter waits for a decision
    Redirect(RedirectOffer),

    /// The server (or TLS layer) issued an authentication challenge
    AuthChallenge(ChallengeOffer),

    /// The call finished without error
    Completed,

    /// The call failed
    Failed(TransportError),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportEvent::Completed | TransportEvent::Failed(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Headers(_) => "headers",
            TransportEvent::Data(_) => "data",
            TransportEvent::Redirect(_) => "redirect",
            TransportEvent::AuthChallenge(_) => "auth_challenge",
            TransportEvent::Completed => "completed",
            TransportEvent::Failed(_) => "failed",
        }
    }
}

/// Redirect proposal with its reply channel
#[derive(Debug)]
pub struct RedirectOffer {
    /// The request the transport would issue next
    pub request: RequestSnapshot,

    /// The redirect response
    pub response: ResponseSnapshot,

    pub reply: oneshot::Sender<RedirectDecision>,
}

/// Answer to a redirect offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Issue the proposed request
    Follow,

    /// Deliver the redirect response itself as the final response
    Stop,
}

/// Authentication challenge with its reply channel
#[derive(Debug)]
pub struct ChallengeOffer {
    pub challenge: AuthChallenge,
    pub reply: oneshot::Sender<ChallengeDisposition>,
}

/// Kind of authentication being requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Server identity (certificate) trust
    ServerTrust,
    HttpBasic,
    HttpDigest,
    ClientCertificate,
    Other(String),
}

/// Where a challenge comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    pub host: String,
    pub port: u16,
    pub realm: Option<String>,
    pub method: AuthMethod,
}

/// Credential presented by the server (its certificate chain, DER)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredential {
    pub certificate_chain: Vec<Bytes>,
}

/// An authentication challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub protection_space: ProtectionSpace,

    /// Present for server-trust challenges
    pub presented: Option<ServerCredential>,
}

impl AuthChallenge {
    pub fn server_trust(host: impl Into<String>, port: u16, chain: Vec<Bytes>) -> Self {
        Self {
            protection_space: ProtectionSpace {
                host: host.into(),
                port,
                realm: None,
                method: AuthMethod::ServerTrust,
            },
            presented: Some(ServerCredential {
                certificate_chain: chain,
            }),
        }
    }

    /// Build a challenge from a `WWW-Authenticate` header value
    pub fn from_www_authenticate(host: impl Into<String>, port: u16, value: &str) -> Self {
        let value = value.trim();
        let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));

        let method = if scheme.eq_ignore_ascii_case("basic") {
            AuthMethod::HttpBasic
        } else if scheme.eq_ignore_ascii_case("digest") {
            AuthMethod::HttpDigest
        } else {
            AuthMethod::Other(scheme.to_string())
        };

        let realm = params.split(',').find_map(|p| {
            let (key, val) = p.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("realm") {
                Some(val.trim().trim_matches('"').to_string())
            } else {
                None
            }
        });

        Self {
            protection_space: ProtectionSpace {
                host: host.into(),
                port,
                realm,
                method,
            },
            presented: None,
        }
    }

    pub fn is_server_trust(&self) -> bool {
        self.protection_space.method == AuthMethod::ServerTrust
    }
}

/// Answer to an authentication challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Proceed using the given credential
    UseCredential(ServerCredential),

    /// Let the adapter apply its default behavior
    PerformDefaultHandling,

    /// Abort the challenge (the call fails)
    CancelChallenge,
}

/// Failure category reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connectivity, DNS, I/O
    Network,

    /// TLS negotiation or certificate validation
    Tls,

    /// Malformed exchange, redirect loops, rejected challenges
    Protocol,

    /// The underlying connection/session was invalidated asynchronously
    Invalidated,

    /// The event stream ended without a terminal event
    Closed,
}

/// A transport failure; `description` is relayed verbatim
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub description: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn network(description: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, description)
    }

    pub fn invalidated(description: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Invalidated, description)
    }

    pub fn closed() -> Self {
        Self::new(
            TransportErrorKind::Closed,
            "transport closed before the exchange completed",
        )
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        EngineError::TransportFailed(err.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_www_authenticate_parsing() {
        let challenge =
            AuthChallenge::from_www_authenticate("example.com", 443, r#"Basic realm="staff", charset="UTF-8""#);

        assert_eq!(challenge.protection_space.method, AuthMethod::HttpBasic);
        assert_eq!(challenge.protection_space.realm.as_deref(), Some("staff"));
        assert!(!challenge.is_server_trust());
        assert!(challenge.presented.is_none());
    }

    #[test]
    fn test_unknown_scheme() {
        let challenge = AuthChallenge::from_www_authenticate("example.com", 80, "Bearer");
        assert_eq!(
            challenge.protection_space.method,
            AuthMethod::Other("Bearer".to_string())
        );
        assert!(challenge.protection_space.realm.is_none());
    }

    #[test]
    fn test_server_trust_challenge() {
        let challenge = AuthChallenge::server_trust("example.com", 443, vec![Bytes::from_static(b"der")]);
        assert!(challenge.is_server_trust());
        assert_eq!(challenge.presented.unwrap().certificate_chain.len(), 1);
    }

    #[test]
    fn test_error_display_is_verbatim() {
        let err = TransportError::network("timeout");
        assert_eq!(err.to_string(), "timeout");

        let engine: EngineError = err.into();
        assert_eq!(engine.to_string(), "timeout");
    }

    #[test]
    fn test_terminal_events() {
        assert!(TransportEvent::Completed.is_terminal());
        assert!(TransportEvent::Failed(TransportError::closed()).is_terminal());
        assert!(!TransportEvent::Data(Bytes::new()).is_terminal());
    }
}
