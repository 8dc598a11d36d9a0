// packages/engine/src/interception/tls_handler.rs
//! Server identity trust
//!
//! [`ServerTrustPolicy`] answers server-trust challenges raised on the event
//! stream and also drives the certificate verifier installed in the hyper
//! transport's rustls configuration, so both paths apply the same policy.
//!
//! `TrustPresentedCredential` accepts any certificate the server presents.
//! It disables server authentication and must be opted into explicitly.

use crate::interception::transport::{AuthChallenge, ChallengeDisposition};
use crate::utils::errors::{EngineError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// How server identity challenges are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTrustPolicy {
    /// Validate against the bundled web PKI roots
    #[default]
    ValidateWithTrustStore,

    /// Trust whatever credential the server presents
    TrustPresentedCredential,
}

impl ServerTrustPolicy {
    /// Disposition for a challenge raised on the event stream
    ///
    /// Only server-trust challenges are answered; everything else is left to
    /// the adapter's default handling.
    pub fn disposition(&self, challenge: &AuthChallenge) -> ChallengeDisposition {
        if !challenge.is_server_trust() {
            return ChallengeDisposition::PerformDefaultHandling;
        }

        match (self, &challenge.presented) {
            (ServerTrustPolicy::TrustPresentedCredential, Some(credential)) => {
                warn!(
                    "Trusting presented credential for {}:{} without validation",
                    challenge.protection_space.host, challenge.protection_space.port
                );
                ChallengeDisposition::UseCredential(credential.clone())
            }
            _ => ChallengeDisposition::PerformDefaultHandling,
        }
    }
}

/// Certificate verifier applying a [`ServerTrustPolicy`] over web PKI validation
#[derive(Debug)]
struct PolicyVerifier {
    policy: ServerTrustPolicy,
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(err) if self.policy == ServerTrustPolicy::TrustPresentedCredential => {
                warn!(
                    "Certificate for {:?} failed validation ({}), trusting it per policy",
                    server_name, err
                );
                Ok(ServerCertVerified::assertion())
            }
            Err(err) => {
                debug!("Certificate for {:?} rejected: {}", server_name, err);
                Err(err)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build the rustls client configuration used by the hyper transport
pub fn client_config(policy: ServerTrustPolicy) -> Result<ClientConfig> {
    let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| EngineError::TlsError(format!("Failed to build certificate verifier: {}", e)))?;

    if policy == ServerTrustPolicy::TrustPresentedCredential {
        warn!("Server certificate validation failures will be ignored");
    }

    let verifier = Arc::new(PolicyVerifier { policy, inner });

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| EngineError::TlsError(format!("Unsupported protocol versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(config)
}
