//! Pinning inside the rustls handshake.
//!
//! [`PinningVerifier`] runs normal CA validation through an inner verifier,
//! then checks the presented chain against the pin sets. An enforced
//! violation fails certificate verification, so the handshake is torn down
//! before any application data is exchanged.

use std::borrow::Cow;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, OtherError, RootCertStore, SignatureScheme};
use tracing::warn;

use crate::enforcer::{Action, PinEnforcer, PinningAdapter};
use crate::error::Error;

#[derive(Debug)]
pub struct PinningVerifier {
    enforcer: Arc<PinEnforcer>,
    inner: Arc<dyn ServerCertVerifier>,
}

impl PinningVerifier {
    /// Pin on top of `inner`, which performs CA validation and signature
    /// checks.
    pub fn new(enforcer: Arc<PinEnforcer>, inner: Arc<dyn ServerCertVerifier>) -> Self {
        Self { enforcer, inner }
    }

    /// Pin on top of WebPKI validation against the Mozilla root store.
    pub fn with_webpki_roots(enforcer: Arc<PinEnforcer>) -> Result<Self, Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let inner = WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .build()?;
        Ok(Self::new(enforcer, inner))
    }

    pub fn enforcer(&self) -> &Arc<PinEnforcer> {
        &self.enforcer
    }

    /// Build a client configuration that verifies servers with `self`.
    pub fn client_config(self) -> Result<ClientConfig, Error> {
        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(self))
                .with_no_client_auth();
        Ok(config)
    }
}

impl PinningAdapter for PinningVerifier {
    fn evaluate(&self, hostname: &str, chain: &[CertificateDer<'_>]) -> Action {
        self.enforcer.evaluate(hostname, chain)
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // CA failures pass through untouched and are not pin violations.
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let hostname: Cow<'_, str> = match server_name {
            ServerName::DnsName(dns) => Cow::Borrowed(dns.as_ref()),
            ServerName::IpAddress(ip) => Cow::Owned(std::net::IpAddr::from(*ip).to_string()),
            _ => {
                warn!("Unsupported server name type, skipping pin validation");
                return Ok(ServerCertVerified::assertion());
            }
        };

        let chain: Vec<&CertificateDer<'_>> =
            std::iter::once(end_entity).chain(intermediates).collect();
        match self.enforcer.evaluate_chain(&hostname, None, &chain) {
            Action::Proceed => Ok(ServerCertVerified::assertion()),
            Action::Abort(failure) => Err(rustls::Error::Other(OtherError(Arc::new(failure)))),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
