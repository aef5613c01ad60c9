use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Error;
use crate::fingerprint::{PublicKeyFingerprint, SpkiSource};
use crate::resolver::{PinResolver, PinSetResolver, ResolvedPinSet};
use crate::types::config::{EnforceMode, PinSetConfig, UnpinnedPolicy};
use crate::types::validation::ValidationResult;

/// Checks certificate chains against the pin sets of a [`PinResolver`].
///
/// Holds no mutable state: the same `(hostname, chain)` always yields the
/// same [`ValidationResult`] for a given clock reading.
pub struct ChainValidator {
    resolver: Box<dyn PinResolver>,
}

impl fmt::Debug for ChainValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainValidator")
            .field("resolver", &"<dyn PinResolver>")
            .finish()
    }
}

impl ChainValidator {
    pub fn new(resolver: impl PinResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// Validate `config` and build a validator over a [`PinSetResolver`].
    pub fn from_config(config: PinSetConfig) -> Result<Self, Error> {
        Ok(Self::new(PinSetResolver::new(config)?))
    }

    pub fn resolver(&self) -> &dyn PinResolver {
        self.resolver.as_ref()
    }

    /// Validate a chain (leaf first) presented by `hostname`.
    ///
    /// Implements a 5-step flow:
    /// 1. Resolve the pin set; unpinned hosts follow the unpinned policy
    /// 2. Treat the host as unpinned if its pin set has expired
    /// 3. Fingerprint every certificate, leaf and intermediates alike
    /// 4. Accept on the first fingerprint that is pinned
    /// 5. Otherwise reject, carrying every evaluated fingerprint
    ///
    /// Report-only pin sets still produce `Rejected`; it is up to the caller
    /// to let the connection through. A certificate whose key cannot be
    /// extracted counts as a non-match and does not stop validation.
    pub fn validate<C: SpkiSource>(&self, hostname: &str, chain: &[C]) -> ValidationResult {
        self.validate_at(hostname, chain, Utc::now())
    }

    /// [`validate`](Self::validate) with an explicit clock for expiration.
    pub fn validate_at<C: SpkiSource>(
        &self,
        hostname: &str,
        chain: &[C],
        now: DateTime<Utc>,
    ) -> ValidationResult {
        self.evaluate(hostname, chain, now).0
    }

    /// Validation plus the pin set it was checked against, for reporting.
    pub(crate) fn evaluate<C: SpkiSource>(
        &self,
        hostname: &str,
        chain: &[C],
        now: DateTime<Utc>,
    ) -> (ValidationResult, Option<&ResolvedPinSet>) {
        // Step 1: Resolve
        let pin_set = match self.resolver.resolve(hostname) {
            Some(pin_set) => pin_set,
            None => return (self.unpinned(hostname, chain), None),
        };

        // Step 2: An expired pin set leaves the host unpinned
        if pin_set.is_expired_at(now) {
            debug!(
                host = hostname,
                noted = %pin_set.pattern,
                "Pin set expired, applying unpinned policy"
            );
            return (self.unpinned(hostname, chain), None);
        }

        // Step 3: Fingerprint the chain
        let evaluated = fingerprint_chain(hostname, chain);

        // Steps 4-5: Membership
        let result = match evaluated.iter().find(|fp| pin_set.contains(fp)) {
            Some(pin) => ValidationResult::accepted(
                hostname,
                &pin_set.pattern,
                pin_set.enforce_mode,
                *pin,
                evaluated.clone(),
            ),
            None => ValidationResult::rejected(
                hostname,
                Some(&pin_set.pattern),
                pin_set.enforce_mode,
                evaluated,
            ),
        };
        (result, Some(pin_set))
    }

    fn unpinned<C: SpkiSource>(&self, hostname: &str, chain: &[C]) -> ValidationResult {
        match self.resolver.unpinned_policy() {
            UnpinnedPolicy::Allow => ValidationResult::unpinned(hostname),
            UnpinnedPolicy::Reject => ValidationResult::rejected(
                hostname,
                None,
                EnforceMode::Enforce,
                fingerprint_chain(hostname, chain),
            ),
        }
    }
}

fn fingerprint_chain<C: SpkiSource>(hostname: &str, chain: &[C]) -> Vec<PublicKeyFingerprint> {
    let mut evaluated = Vec::with_capacity(chain.len());
    for (position, cert) in chain.iter().enumerate() {
        match cert.spki_fingerprint() {
            Ok(fp) => evaluated.push(fp),
            Err(e) => debug!(
                host = hostname,
                position,
                error = %e,
                "Certificate key unusable, treating as non-matching"
            ),
        }
    }
    evaluated
}
