use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::PublicKeyFingerprint;
use crate::resolver::ResolvedPinSet;
use crate::types::config::EnforceMode;
use crate::types::validation::ValidationResult;

/// Evidence for one pin validation failure, delivered to observers after
/// the connection that produced it may already be gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub noted_hostname: Option<String>,
    pub include_subdomains: bool,
    pub enforce_mode: EnforceMode,
    pub timestamp: DateTime<Utc>,
    pub evaluated_chain: Vec<PublicKeyFingerprint>,
    pub expected_pins: Vec<PublicKeyFingerprint>,
    #[serde(skip)]
    pub report_uris: Vec<String>,
}

impl ViolationReport {
    /// Build a report from a rejected validation and the pin set it was
    /// checked against. `pin_set` is `None` for unconfigured hosts rejected
    /// by a fail-closed policy.
    pub fn new(
        result: &ValidationResult,
        pin_set: Option<&ResolvedPinSet>,
        port: Option<u16>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            hostname: result.hostname.clone(),
            port,
            noted_hostname: result.noted_hostname.clone(),
            include_subdomains: pin_set.map_or(false, |p| p.include_subdomains),
            enforce_mode: result.enforce_mode.unwrap_or_default(),
            timestamp,
            evaluated_chain: result.evaluated_chain.clone(),
            expected_pins: pin_set
                .map(|p| p.pins.iter().copied().collect())
                .unwrap_or_default(),
            report_uris: pin_set.map(|p| p.report_uris.clone()).unwrap_or_default(),
        }
    }

    /// One-line human readable rendering.
    pub fn summary(&self) -> String {
        let target = match self.port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        };
        format!(
            "pin validation failed for {} at {} (noted: {}, mode: {}); presented [{}], expected [{}]",
            target,
            self.timestamp.to_rfc3339(),
            self.noted_hostname.as_deref().unwrap_or("<unpinned>"),
            self.enforce_mode,
            join(&self.evaluated_chain),
            join(&self.expected_pins),
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn join(fingerprints: &[PublicKeyFingerprint]) -> String {
    fingerprints
        .iter()
        .map(|fp| fp.to_base64())
        .collect::<Vec<_>>()
        .join(", ")
}
