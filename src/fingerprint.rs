//! Public-key fingerprints for certificate pinning.
//!
//! A pin is the SHA-256 digest of a certificate's DER-encoded Subject Public
//! Key Info. Pinning the key rather than the whole certificate lets a server
//! renew its certificate without breaking clients, as long as it keeps the
//! key pair.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::Error;

/// Length in bytes of a SHA-256 public-key fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

const HPKP_PREFIX: &str = "sha256/";
const HEX_PREFIX: &str = "sha256:";

/// SHA-256 digest of a certificate's Subject Public Key Info.
///
/// The canonical text form is standard base64 (44 characters), the encoding
/// used by network security configurations. [`FromStr`] additionally
/// accepts `sha256/<base64>` and `sha256:<hex>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKeyFingerprint([u8; FINGERPRINT_LEN]);

impl PublicKeyFingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Fingerprint of a DER-encoded SubjectPublicKeyInfo structure.
    pub fn of_spki(spki_der: &[u8]) -> Self {
        Self(Sha256::digest(spki_der).into())
    }

    /// Parse a DER certificate and fingerprint its public key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedCertificate`] if the bytes are not an X.509
    /// certificate.
    pub fn of_certificate(cert_der: &[u8]) -> Result<Self, Error> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| Error::MalformedCertificate(e.to_string()))?;
        Ok(Self::of_spki(cert.public_key().raw))
    }

    /// Fingerprint the first certificate of a PEM document.
    ///
    /// Intended for operators generating pins from certificate files.
    pub fn of_pem_certificate(pem: &[u8]) -> Result<Self, Error> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| Error::MalformedCertificate(e.to_string()))?;
        if pem.label != "CERTIFICATE" {
            return Err(Error::MalformedCertificate(format!(
                "expected a CERTIFICATE PEM block, found '{}'",
                pem.label
            )));
        }
        Self::of_certificate(&pem.contents)
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    /// Hex form prefixed with `sha256:`.
    pub fn to_hex(&self) -> String {
        format!("{}{}", HEX_PREFIX, hex::encode(self.0))
    }

    fn from_digest(bytes: Vec<u8>, input: &str) -> Result<Self, Error> {
        let digest: [u8; FINGERPRINT_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidFingerprint(format!(
                "'{}' decodes to {} bytes, expected {}",
                input,
                b.len(),
                FINGERPRINT_LEN
            ))
        })?;
        Ok(Self(digest))
    }
}

impl FromStr for PublicKeyFingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex_part) = s.strip_prefix(HEX_PREFIX) {
            let bytes = hex::decode(hex_part)
                .map_err(|e| Error::InvalidFingerprint(format!("'{}': {}", s, e)))?;
            return Self::from_digest(bytes, s);
        }
        let b64 = s.strip_prefix(HPKP_PREFIX).unwrap_or(s);
        let bytes = general_purpose::STANDARD.decode(b64)?;
        Self::from_digest(bytes, s)
    }
}

impl fmt::Display for PublicKeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyFingerprint({})", self.to_base64())
    }
}

impl Serialize for PublicKeyFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKeyFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Anything a public-key fingerprint can be derived from.
///
/// Implemented for rustls certificates so chains from the TLS layer can be
/// validated directly, and for precomputed fingerprints for stacks that
/// already expose SPKI digests.
pub trait SpkiSource {
    fn spki_fingerprint(&self) -> Result<PublicKeyFingerprint, Error>;
}

impl SpkiSource for CertificateDer<'_> {
    fn spki_fingerprint(&self) -> Result<PublicKeyFingerprint, Error> {
        PublicKeyFingerprint::of_certificate(self.as_ref())
    }
}

impl SpkiSource for PublicKeyFingerprint {
    fn spki_fingerprint(&self) -> Result<PublicKeyFingerprint, Error> {
        Ok(*self)
    }
}

impl<T: SpkiSource + ?Sized> SpkiSource for &T {
    fn spki_fingerprint(&self) -> Result<PublicKeyFingerprint, Error> {
        (**self).spki_fingerprint()
    }
}
