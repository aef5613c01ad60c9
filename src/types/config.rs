use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fingerprint::PublicKeyFingerprint;

/// Whether a pin mismatch blocks the connection or is only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforceMode {
    #[default]
    Enforce,
    ReportOnly,
}

impl fmt::Display for EnforceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforceMode::Enforce => f.write_str("enforce"),
            EnforceMode::ReportOnly => f.write_str("report-only"),
        }
    }
}

/// Decision for hosts with no configured pin set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnpinnedPolicy {
    /// Pinning is opt-in: unconfigured hosts are accepted.
    #[default]
    Allow,
    /// Fail closed: unconfigured hosts are rejected and enforced.
    Reject,
}

/// Pins and options configured for one host pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DomainPinSet {
    /// Base64 SHA-256 SPKI digests (`sha256/` and `sha256:<hex>` forms accepted).
    pub pins: Vec<String>,
    #[serde(default)]
    pub enforce_mode: EnforceMode,
    #[serde(default)]
    pub include_subdomains: bool,
    /// Last day on which the pins apply. Pinning stops after this date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_uris: Vec<String>,
}

impl DomainPinSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.pins.push(pin.into());
        self
    }

    pub fn pin_fingerprint(self, fingerprint: PublicKeyFingerprint) -> Self {
        self.pin(fingerprint.to_base64())
    }

    pub fn enforce_mode(mut self, mode: EnforceMode) -> Self {
        self.enforce_mode = mode;
        self
    }

    pub fn include_subdomains(mut self, include: bool) -> Self {
        self.include_subdomains = include;
        self
    }

    pub fn expiration(mut self, date: NaiveDate) -> Self {
        self.expiration = Some(date);
        self
    }

    pub fn report_uri(mut self, uri: impl Into<String>) -> Self {
        self.report_uris.push(uri.into());
        self
    }
}

/// Host pattern → pin set configuration, supplied by the host application.
///
/// Patterns are either exact host names (`api.example.com`) or wildcards
/// covering the direct children of a domain (`*.example.com`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinSetConfig {
    #[serde(default)]
    pub unpinned_policy: UnpinnedPolicy,
    #[serde(default)]
    pub domains: BTreeMap<String, DomainPinSet>,
}

impl PinSetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, pattern: impl Into<String>, pin_set: DomainPinSet) -> Self {
        self.domains.insert(pattern.into(), pin_set);
        self
    }

    pub fn unpinned_policy(mut self, policy: UnpinnedPolicy) -> Self {
        self.unpinned_policy = policy;
        self
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}
