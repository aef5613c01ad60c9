use serde::{Deserialize, Serialize};

use crate::error::PinningFailure;
use crate::fingerprint::PublicKeyFingerprint;
use crate::types::config::EnforceMode;

/// Outcome of checking one certificate chain against a host's pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Accepted,
    Rejected,
}

/// Structured result of a single chain validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub hostname: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pin: Option<PublicKeyFingerprint>,
    /// Fingerprints of the chain in presentation order. Certificates whose
    /// key could not be extracted are left out.
    #[serde(default)]
    pub evaluated_chain: Vec<PublicKeyFingerprint>,
    /// `None` when the host has no applicable pin set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforce_mode: Option<EnforceMode>,
    /// Configured pattern the host resolved to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noted_hostname: Option<String>,
}

impl ValidationResult {
    /// Accepted without pin checks: the host is not pinned.
    pub fn unpinned(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            outcome: Outcome::Accepted,
            matched_pin: None,
            evaluated_chain: vec![],
            enforce_mode: None,
            noted_hostname: None,
        }
    }

    pub fn accepted(
        hostname: &str,
        noted_hostname: &str,
        enforce_mode: EnforceMode,
        matched_pin: PublicKeyFingerprint,
        evaluated_chain: Vec<PublicKeyFingerprint>,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            outcome: Outcome::Accepted,
            matched_pin: Some(matched_pin),
            evaluated_chain,
            enforce_mode: Some(enforce_mode),
            noted_hostname: Some(noted_hostname.to_string()),
        }
    }

    pub fn rejected(
        hostname: &str,
        noted_hostname: Option<&str>,
        enforce_mode: EnforceMode,
        evaluated_chain: Vec<PublicKeyFingerprint>,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            outcome: Outcome::Rejected,
            matched_pin: None,
            evaluated_chain,
            enforce_mode: Some(enforce_mode),
            noted_hostname: noted_hostname.map(|s| s.to_string()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == Outcome::Accepted
    }

    /// Whether the enclosing client must block the connection.
    pub fn must_block(&self) -> bool {
        self.outcome == Outcome::Rejected && self.enforce_mode == Some(EnforceMode::Enforce)
    }

    pub(crate) fn failure(&self, expected_pins: usize) -> PinningFailure {
        PinningFailure {
            hostname: self.hostname.clone(),
            noted_hostname: self.noted_hostname.clone(),
            evaluated_chain: self.evaluated_chain.clone(),
            expected_pins,
        }
    }
}
