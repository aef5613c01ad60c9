use std::error::Error as StdError;

use thiserror::Error;

use crate::fingerprint::PublicKeyFingerprint;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {code}: {message}")]
    Config { code: ConfigErrorCode, message: String },

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Verifier build error: {0}")]
    VerifierBuild(#[from] rustls::client::VerifierBuilderError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn config(code: ConfigErrorCode, message: impl Into<String>) -> Self {
        Error::Config {
            code,
            message: message.into(),
        }
    }

    /// The configuration error code, if this is a configuration error.
    pub fn config_code(&self) -> Option<ConfigErrorCode> {
        match self {
            Error::Config { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Error codes for rejected pin-set configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConfigErrorCode {
    #[serde(rename = "EMPTY_PIN_SET")]
    EmptyPinSet,
    #[serde(rename = "INVALID_PATTERN")]
    InvalidPattern,
    #[serde(rename = "DUPLICATE_PATTERN")]
    DuplicatePattern,
    #[serde(rename = "INVALID_PIN")]
    InvalidPin,
    #[serde(rename = "INVALID_REPORT_URI")]
    InvalidReportUri,
}

impl std::fmt::Display for ConfigErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigErrorCode::EmptyPinSet => "EMPTY_PIN_SET",
            ConfigErrorCode::InvalidPattern => "INVALID_PATTERN",
            ConfigErrorCode::DuplicatePattern => "DUPLICATE_PATTERN",
            ConfigErrorCode::InvalidPin => "INVALID_PIN",
            ConfigErrorCode::InvalidReportUri => "INVALID_REPORT_URI",
        };
        write!(f, "{}", s)
    }
}

/// A connection refused because its certificate chain did not match the
/// pins configured for the host.
///
/// Adapters surface this type unchanged so callers can tell a pinning
/// failure apart from any other TLS or network error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Certificate pinning failure for '{}': none of {} presented key(s) matched the {} pinned key(s)",
    .hostname,
    .evaluated_chain.len(),
    .expected_pins
)]
pub struct PinningFailure {
    pub hostname: String,
    pub noted_hostname: Option<String>,
    pub evaluated_chain: Vec<PublicKeyFingerprint>,
    pub expected_pins: usize,
}

impl PinningFailure {
    /// Extract the pinning failure carried by a rustls handshake error.
    pub fn from_tls_error(err: &rustls::Error) -> Option<&PinningFailure> {
        match err {
            rustls::Error::Other(other) => other.0.downcast_ref::<PinningFailure>(),
            _ => None,
        }
    }

    /// Walk an error's source chain looking for a pinning failure.
    ///
    /// Handles the wrappers HTTP stacks put around handshake errors,
    /// including `std::io::Error`, whose `source()` skips the wrapped value.
    pub fn find_in<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a PinningFailure> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(failure) = e.downcast_ref::<PinningFailure>() {
                return Some(failure);
            }
            if let Some(failure) = e
                .downcast_ref::<rustls::Error>()
                .and_then(Self::from_tls_error)
            {
                return Some(failure);
            }
            if let Some(inner) = e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
                if let Some(failure) = Self::find_in(inner) {
                    return Some(failure);
                }
            }
            current = e.source();
        }
        None
    }
}

/// Failure of a single observer to process a violation report.
///
/// Logged by the reporter and never propagated to the validation caller.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Observer rejected report: {0}")]
    Rejected(String),

    #[error("Report delivery to {uri} failed: {message}")]
    Delivery { uri: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
