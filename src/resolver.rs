//! Pin set resolution.
//!
//! Maps a host name to the pin set configured for it. Lookups take `&self`
//! only and never lock: the tables are built once from a [`PinSetConfig`]
//! and are read-only afterwards, so any number of connections can resolve
//! concurrently.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::error::{ConfigErrorCode, Error};
use crate::fingerprint::PublicKeyFingerprint;
use crate::types::config::{DomainPinSet, EnforceMode, PinSetConfig, UnpinnedPolicy};

// ---------------------------------------------------------------------------
// Resolver trait
// ---------------------------------------------------------------------------

/// Resolve the pin set that applies to a host.
///
/// Implementations must be deterministic and free of side effects.
pub trait PinResolver: Send + Sync {
    /// Return the pin set for `hostname`, or `None` if the host is unpinned.
    fn resolve(&self, hostname: &str) -> Option<&ResolvedPinSet>;

    /// Decision for hosts without a pin set.
    ///
    /// The default implementation returns [`UnpinnedPolicy::Allow`].
    fn unpinned_policy(&self) -> UnpinnedPolicy {
        UnpinnedPolicy::Allow
    }
}

/// A validated pin set, ready for membership checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPinSet {
    /// Normalized configured pattern (`example.com` or `*.example.com`).
    pub pattern: String,
    pub pins: BTreeSet<PublicKeyFingerprint>,
    pub enforce_mode: EnforceMode,
    pub include_subdomains: bool,
    pub expiration: Option<NaiveDate>,
    pub report_uris: Vec<String>,
}

impl ResolvedPinSet {
    pub fn contains(&self, fingerprint: &PublicKeyFingerprint) -> bool {
        self.pins.contains(fingerprint)
    }

    /// Pins stop applying once the expiration day has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration
            .map_or(false, |last_day| now.date_naive() > last_day)
    }
}

// ---------------------------------------------------------------------------
// PinSetResolver (static configuration)
// ---------------------------------------------------------------------------

enum Pattern {
    Exact(String),
    Wildcard(String),
    Address(String),
}

/// Resolver over a static [`PinSetConfig`].
///
/// Precedence for a host `h`:
/// 1. an exact entry for `h`;
/// 2. walking up from the nearest parent domain `p`, a wildcard `*.p` if `h`
///    is a direct child of `p` (or any descendant when the wildcard includes
///    subdomains), then an exact entry `p` with `include_subdomains`.
///
/// IP address literals (IPv6 with or without brackets) only ever match an
/// exact entry for the same address.
#[derive(Debug, Clone, Default)]
pub struct PinSetResolver {
    exact: HashMap<String, ResolvedPinSet>,
    wildcard: HashMap<String, ResolvedPinSet>,
    unpinned_policy: UnpinnedPolicy,
}

impl PinSetResolver {
    /// Validate `config` and build the lookup tables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty pin set, a malformed pattern,
    /// pin or report URI, or two patterns that normalize to the same host.
    /// A configuration that asks for pinning is never silently downgraded.
    pub fn new(config: PinSetConfig) -> Result<Self, Error> {
        let mut exact = HashMap::new();
        let mut wildcard = HashMap::new();

        for (raw, domain) in &config.domains {
            let pattern = parse_pattern(raw)?;
            let is_address = matches!(pattern, Pattern::Address(_));
            let (table, key, display) = match pattern {
                Pattern::Exact(name) | Pattern::Address(name) => (&mut exact, name.clone(), name),
                Pattern::Wildcard(parent) => {
                    let display = format!("*.{}", parent);
                    (&mut wildcard, parent, display)
                }
            };
            let mut pin_set = build_pin_set(raw, display, domain)?;
            if is_address && pin_set.include_subdomains {
                warn!(pattern = %pin_set.pattern, "include_subdomains ignored for an IP address");
                pin_set.include_subdomains = false;
            }
            if table.insert(key, pin_set).is_some() {
                return Err(Error::config(
                    ConfigErrorCode::DuplicatePattern,
                    format!("'{}' duplicates another configured pattern", raw),
                ));
            }
        }

        debug!(
            exact = exact.len(),
            wildcard = wildcard.len(),
            policy = ?config.unpinned_policy,
            "Loaded certificate pin sets"
        );

        Ok(Self {
            exact,
            wildcard,
            unpinned_policy: config.unpinned_policy,
        })
    }

    /// Build from a JSON string representing a [`PinSetConfig`].
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Self::new(PinSetConfig::from_json(json)?)
    }

    /// Number of configured patterns.
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PinResolver for PinSetResolver {
    fn resolve(&self, hostname: &str) -> Option<&ResolvedPinSet> {
        let host = normalize_host(hostname);
        if host.is_empty() {
            return None;
        }
        if let Some(ip) = ip_literal(&host) {
            return self.exact.get(&ip);
        }
        if let Some(pin_set) = self.exact.get(&*host) {
            return Some(pin_set);
        }

        let mut rest: &str = &host;
        let mut depth = 1;
        while let Some((_, parent)) = rest.split_once('.') {
            if parent.is_empty() {
                break;
            }
            if let Some(pin_set) = self.wildcard.get(parent) {
                if depth == 1 || pin_set.include_subdomains {
                    return Some(pin_set);
                }
            }
            if let Some(pin_set) = self.exact.get(parent) {
                if pin_set.include_subdomains {
                    return Some(pin_set);
                }
            }
            rest = parent;
            depth += 1;
        }
        None
    }

    fn unpinned_policy(&self) -> UnpinnedPolicy {
        self.unpinned_policy
    }
}

/// Lowercase and strip the root dot, borrowing when already normal.
fn normalize_host(host: &str) -> Cow<'_, str> {
    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(trimmed.to_ascii_lowercase())
    } else {
        Cow::Borrowed(trimmed)
    }
}

/// Canonical text of an IP address literal, with or without IPv6 brackets.
fn ip_literal(host: &str) -> Option<String> {
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    unbracketed.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

fn parse_pattern(raw: &str) -> Result<Pattern, Error> {
    let invalid = |reason: &str| {
        Error::config(
            ConfigErrorCode::InvalidPattern,
            format!("'{}': {}", raw, reason),
        )
    };

    let host = normalize_host(raw.trim());
    // IP addresses are pinned exactly, never as a parent domain.
    if let Some(ip) = ip_literal(&host) {
        return Ok(Pattern::Address(ip));
    }
    let (is_wildcard, name) = match host.strip_prefix("*.") {
        Some(parent) => (true, parent),
        None => (false, &*host),
    };
    if name.is_empty() {
        return Err(invalid("empty host pattern"));
    }
    for label in name.split('.') {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "expected a bare host name (letters, digits, '-', '_'), or '*.' followed by one",
            ));
        }
    }
    if is_wildcard && !name.contains('.') {
        return Err(invalid("wildcard over a top-level label"));
    }

    Ok(if is_wildcard {
        Pattern::Wildcard(name.to_string())
    } else {
        Pattern::Exact(name.to_string())
    })
}

fn build_pin_set(
    raw: &str,
    pattern: String,
    domain: &DomainPinSet,
) -> Result<ResolvedPinSet, Error> {
    if domain.pins.is_empty() {
        return Err(Error::config(
            ConfigErrorCode::EmptyPinSet,
            format!("'{}' has no pins", raw),
        ));
    }

    let mut pins = BTreeSet::new();
    for pin in &domain.pins {
        let fingerprint = pin.parse::<PublicKeyFingerprint>().map_err(|e| {
            Error::config(ConfigErrorCode::InvalidPin, format!("'{}': {}", raw, e))
        })?;
        pins.insert(fingerprint);
    }

    for uri in &domain.report_uris {
        if !(uri.starts_with("https://") || uri.starts_with("http://")) {
            return Err(Error::config(
                ConfigErrorCode::InvalidReportUri,
                format!("'{}': report URI '{}' must be http(s)", raw, uri),
            ));
        }
    }

    if pins.len() == 1 && domain.enforce_mode == EnforceMode::Enforce {
        warn!(pattern = %pattern, "Enforced pin set has no backup pin");
    }

    Ok(ResolvedPinSet {
        pattern,
        pins,
        enforce_mode: domain.enforce_mode,
        include_subdomains: domain.include_subdomains,
        expiration: domain.expiration,
        report_uris: domain.report_uris.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u8) -> PublicKeyFingerprint {
        PublicKeyFingerprint::from_bytes([n; 32])
    }

    fn pins(n: u8) -> DomainPinSet {
        DomainPinSet::new().pin_fingerprint(fp(n)).pin_fingerprint(fp(n + 100))
    }

    fn resolver(config: PinSetConfig) -> PinSetResolver {
        PinSetResolver::new(config).unwrap()
    }

    fn pattern_of(resolver: &PinSetResolver, host: &str) -> Option<String> {
        resolver.resolve(host).map(|p| p.pattern.clone())
    }

    #[test]
    fn test_exact_match() {
        let r = resolver(PinSetConfig::new().with_domain("example.com", pins(1)));
        let pin_set = r.resolve("example.com").unwrap();
        assert!(pin_set.contains(&fp(1)));
        assert!(pin_set.contains(&fp(101)));
        assert!(!pin_set.contains(&fp(2)));
        assert!(r.resolve("api.example.com").is_none());
        assert!(r.resolve("other.com").is_none());
    }

    #[test]
    fn test_include_subdomains() {
        let r = resolver(
            PinSetConfig::new().with_domain("example.com", pins(1).include_subdomains(true)),
        );
        assert_eq!(pattern_of(&r, "api.example.com").as_deref(), Some("example.com"));
        assert_eq!(pattern_of(&r, "a.b.example.com").as_deref(), Some("example.com"));
        assert!(r.resolve("badexample.com").is_none());
    }

    #[test]
    fn test_exact_beats_subdomain_and_wildcard() {
        let r = resolver(
            PinSetConfig::new()
                .with_domain("example.com", pins(1).include_subdomains(true))
                .with_domain("*.example.com", pins(2))
                .with_domain("api.example.com", pins(3)),
        );
        assert_eq!(pattern_of(&r, "api.example.com").as_deref(), Some("api.example.com"));
        assert_eq!(pattern_of(&r, "www.example.com").as_deref(), Some("*.example.com"));
        assert_eq!(pattern_of(&r, "x.www.example.com").as_deref(), Some("example.com"));
        assert_eq!(pattern_of(&r, "example.com").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_wildcard_depth() {
        let r = resolver(
            PinSetConfig::new()
                .with_domain("*.cdn.example.net", pins(1))
                .with_domain("*.static.example.net", pins(2).include_subdomains(true)),
        );
        assert!(r.resolve("edge.cdn.example.net").is_some());
        assert!(r.resolve("a.edge.cdn.example.net").is_none());
        assert!(r.resolve("cdn.example.net").is_none());
        assert_eq!(
            pattern_of(&r, "a.b.static.example.net").as_deref(),
            Some("*.static.example.net")
        );
    }

    #[test]
    fn test_nearest_ancestor_wins() {
        let r = resolver(
            PinSetConfig::new()
                .with_domain("example.com", pins(1).include_subdomains(true))
                .with_domain("eu.example.com", pins(2).include_subdomains(true)),
        );
        assert_eq!(pattern_of(&r, "api.eu.example.com").as_deref(), Some("eu.example.com"));
        assert_eq!(pattern_of(&r, "api.us.example.com").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_case_and_trailing_dot() {
        let r = resolver(PinSetConfig::new().with_domain("Example.COM.", pins(1)));
        assert!(r.resolve("example.com").is_some());
        assert!(r.resolve("EXAMPLE.com.").is_some());
        assert!(r.resolve("").is_none());
        assert!(r.resolve(".").is_none());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let r = resolver(
            PinSetConfig::new()
                .with_domain("example.com", pins(1).include_subdomains(true))
                .with_domain("*.example.com", pins(2)),
        );
        let first = r.resolve("www.example.com").cloned();
        for _ in 0..10 {
            assert_eq!(r.resolve("www.example.com").cloned(), first);
        }
    }

    #[test]
    fn test_empty_pin_set_rejected() {
        let err = PinSetResolver::new(
            PinSetConfig::new().with_domain("example.com", DomainPinSet::new()),
        )
        .unwrap_err();
        assert_eq!(err.config_code(), Some(ConfigErrorCode::EmptyPinSet));
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        for raw in [
            "",
            "https://example.com",
            "example.com:443",
            "example.com/path",
            "exa mple.com",
            "a..example.com",
            "*.com",
            "api.*.example.com",
            "*example.com",
        ] {
            let err = PinSetResolver::new(PinSetConfig::new().with_domain(raw, pins(1)))
                .expect_err(raw);
            assert_eq!(err.config_code(), Some(ConfigErrorCode::InvalidPattern), "{}", raw);
        }
    }

    #[test]
    fn test_ip_address_patterns() {
        let r = resolver(
            PinSetConfig::new()
                .with_domain("2001:DB8::1", pins(1))
                .with_domain("[::1]", pins(2))
                .with_domain("10.0.0.1", pins(3).include_subdomains(true)),
        );
        assert_eq!(pattern_of(&r, "2001:db8::1").as_deref(), Some("2001:db8::1"));
        assert_eq!(pattern_of(&r, "[2001:db8:0::1]").as_deref(), Some("2001:db8::1"));
        assert_eq!(pattern_of(&r, "::1").as_deref(), Some("::1"));
        assert_eq!(pattern_of(&r, "10.0.0.1").as_deref(), Some("10.0.0.1"));
        assert!(r.resolve("2001:db8::2").is_none());
        assert!(r.resolve("5.10.0.0.1").is_none());
        assert!(!r.resolve("10.0.0.1").unwrap().include_subdomains);

        for raw in ["*.::1", "[::1", "::1::2"] {
            let err = PinSetResolver::new(PinSetConfig::new().with_domain(raw, pins(1)))
                .expect_err(raw);
            assert_eq!(err.config_code(), Some(ConfigErrorCode::InvalidPattern), "{}", raw);
        }
    }

    #[test]
    fn test_duplicate_after_normalization() {
        let err = PinSetResolver::new(
            PinSetConfig::new()
                .with_domain("example.com", pins(1))
                .with_domain("EXAMPLE.com.", pins(2)),
        )
        .unwrap_err();
        assert_eq!(err.config_code(), Some(ConfigErrorCode::DuplicatePattern));
    }

    #[test]
    fn test_invalid_pin_rejected() {
        let err = PinSetResolver::new(
            PinSetConfig::new().with_domain("example.com", DomainPinSet::new().pin("AAAA")),
        )
        .unwrap_err();
        assert_eq!(err.config_code(), Some(ConfigErrorCode::InvalidPin));
    }

    #[test]
    fn test_invalid_report_uri_rejected() {
        let err = PinSetResolver::new(
            PinSetConfig::new().with_domain("example.com", pins(1).report_uri("ftp://x")),
        )
        .unwrap_err();
        assert_eq!(err.config_code(), Some(ConfigErrorCode::InvalidReportUri));
    }

    #[test]
    fn test_from_json_and_policy() {
        let r = PinSetResolver::from_json(
            r#"{"unpinned_policy": "reject", "domains": {"example.com": {"pins": ["AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="]}}}"#,
        )
        .unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.unpinned_policy(), UnpinnedPolicy::Reject);
        assert!(r.resolve("example.com").unwrap().contains(&fp(0)));

        assert!(PinSetResolver::default().is_empty());
        assert_eq!(PinSetResolver::default().unpinned_policy(), UnpinnedPolicy::Allow);
    }

    #[test]
    fn test_expiration() {
        let r = resolver(PinSetConfig::new().with_domain(
            "example.com",
            pins(1).expiration(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()),
        ));
        let pin_set = r.resolve("example.com").unwrap();
        let on_last_day = "2030-01-01T23:59:59Z".parse::<DateTime<Utc>>().unwrap();
        let day_after = "2030-01-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(!pin_set.is_expired_at(on_last_day));
        assert!(pin_set.is_expired_at(day_after));
    }
}
