//! TLS trust evaluation.
//!
//! [`TrustVerifier`] turns a [`TlsPolicy`] into a rustls client config. The
//! verification policy is built per transport and handed to each dial
//! explicitly; there is no process-wide provider or verifier state.
//!
//! | Policy | Verifier |
//! |--------|----------|
//! | `Disabled` | none, plain TCP |
//! | `Unpinned` | rustls `WebPkiServerVerifier` against the SNI host |
//! | `Pinned` | [`PinnedVerifier`] against the pinned domain |

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::TlsPolicy;
use crate::error::{Error, Result};

// ============================================================================
// TrustVerifier
// ============================================================================

/// Per-transport TLS setup derived from a [`TlsPolicy`].
///
/// Cheap to clone; the rustls config is shared.
#[derive(Debug, Clone)]
pub struct TrustVerifier {
    /// Policy this verifier was built from.
    policy: TlsPolicy,
    /// Client config and SNI name, absent when TLS is disabled.
    session: Option<TlsSession>,
}

#[derive(Debug, Clone)]
struct TlsSession {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TrustVerifier {
    /// Builds the verifier for `policy` on an endpoint with `host`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if a trust anchor is malformed, or if `host`
    /// or the pinned domain is not a valid server name.
    pub fn new(
        policy: &TlsPolicy,
        host: &str,
        extra_roots: &[CertificateDer<'static>],
    ) -> Result<Self> {
        let session = match policy {
            TlsPolicy::Disabled => None,
            TlsPolicy::Unpinned => {
                let provider = provider();
                let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
                    .with_safe_default_protocol_versions()
                    .map_err(|e| Error::tls(e.to_string()))?
                    .with_root_certificates(root_store(extra_roots)?)
                    .with_no_client_auth();

                Some(TlsSession {
                    config: Arc::new(config),
                    server_name: server_name(host)?,
                })
            }
            TlsPolicy::Pinned {
                domain,
                allow_self_signed,
            } => {
                let domain = domain.as_deref().unwrap_or(host);
                let verifier =
                    PinnedVerifier::new(domain, *allow_self_signed, root_store(extra_roots)?)?;

                if *allow_self_signed {
                    warn!(domain, "Certificate verification disabled for self-signed peers");
                }

                let config = ClientConfig::builder_with_provider(Arc::clone(&verifier.provider))
                    .with_safe_default_protocol_versions()
                    .map_err(|e| Error::tls(e.to_string()))?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth();

                Some(TlsSession {
                    config: Arc::new(config),
                    server_name: server_name(host)?,
                })
            }
        };

        debug!(?policy, host, "TLS verifier prepared");

        Ok(Self {
            policy: policy.clone(),
            session,
        })
    }

    /// Returns the policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &TlsPolicy {
        &self.policy
    }

    /// Returns `true` when dials go through TLS.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the rustls client config, if TLS is enabled.
    #[inline]
    #[must_use]
    pub fn client_config(&self) -> Option<Arc<ClientConfig>> {
        self.session.as_ref().map(|s| Arc::clone(&s.config))
    }

    /// Returns the SNI name sent during the handshake, if TLS is enabled.
    #[inline]
    #[must_use]
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.session.as_ref().map(|s| &s.server_name)
    }

    /// Returns a connector and SNI name for one handshake.
    pub(crate) fn connector(&self) -> Option<(TlsConnector, ServerName<'static>)> {
        self.session.as_ref().map(|s| {
            (
                TlsConnector::from(Arc::clone(&s.config)),
                s.server_name.clone(),
            )
        })
    }
}

// ============================================================================
// PinnedVerifier
// ============================================================================

/// Certificate verifier constrained to a pinned domain.
///
/// The peer chain is evaluated against the trust anchors as if the server
/// name were `domain`, whatever name was dialed. With `allow_self_signed`
/// every chain is accepted; handshake signatures are still checked.
#[derive(Debug)]
pub struct PinnedVerifier {
    domain: ServerName<'static>,
    allow_self_signed: bool,
    inner: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
}

impl PinnedVerifier {
    /// Creates a verifier pinned to `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if `domain` is not a valid server name or the
    /// root store is empty.
    pub fn new(domain: &str, allow_self_signed: bool, roots: RootCertStore) -> Result<Self> {
        let provider = provider();
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .map_err(|e| Error::tls(e.to_string()))?;

        Ok(Self {
            domain: server_name(domain)?,
            allow_self_signed,
            inner,
            provider,
        })
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if self.allow_self_signed {
            return Ok(ServerCertVerified::assertion());
        }

        self.inner
            .verify_server_cert(end_entity, intermediates, &self.domain, ocsp_response, now)
            .inspect_err(|e| warn!(domain = ?self.domain, error = %e, "Pinned certificate rejected"))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Crypto provider used for every TLS config in this crate.
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Web PKI roots plus caller-supplied anchors.
fn root_store(extra_roots: &[CertificateDer<'static>]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    for certificate in extra_roots {
        roots
            .add(certificate.clone())
            .map_err(|e| Error::tls(format!("invalid trust anchor: {e}")))?;
    }

    Ok(roots)
}

fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|e| Error::tls(format!("invalid server name '{name}': {e}")))
}

/// Returns the rustls error behind an I/O error from a TLS stream, if any.
pub(crate) fn tls_failure(err: &io::Error) -> Option<&rustls::Error> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
}

// ============================================================================
// Tests
// ============================================================================
