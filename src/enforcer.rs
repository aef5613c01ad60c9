//! Turning validation results into connection decisions.

use std::sync::Arc;

use chrono::Utc;
use rustls::pki_types::CertificateDer;
use tracing::{debug, error, warn};

use crate::error::{Error, PinningFailure};
use crate::fingerprint::SpkiSource;
use crate::reporter::ViolationReporter;
use crate::types::config::{EnforceMode, PinSetConfig};
use crate::types::report::ViolationReport;
use crate::types::validation::Outcome;
use crate::validator::ChainValidator;

/// What a client adapter must do with the connection under evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Proceed,
    Abort(PinningFailure),
}

impl Action {
    pub fn is_abort(&self) -> bool {
        matches!(self, Action::Abort(_))
    }
}

/// Single-method seam shared by every client adapter.
pub trait PinningAdapter: Send + Sync {
    /// Decide whether a connection to `hostname` presenting `chain`
    /// (leaf first) may carry application data.
    fn evaluate(&self, hostname: &str, chain: &[CertificateDer<'_>]) -> Action;
}

/// Validates a chain once, reports rejections and maps the result to an
/// [`Action`].
///
/// Only a `Rejected` outcome under [`EnforceMode::Enforce`] aborts;
/// report-only violations are reported and the connection proceeds.
#[derive(Debug)]
pub struct PinEnforcer {
    validator: ChainValidator,
    reporter: Arc<ViolationReporter>,
}

impl PinEnforcer {
    pub fn new(validator: ChainValidator, reporter: Arc<ViolationReporter>) -> Self {
        Self {
            validator,
            reporter,
        }
    }

    /// Validate `config` and start a dedicated reporter for it.
    pub fn from_config(config: PinSetConfig) -> Result<Self, Error> {
        let validator = ChainValidator::from_config(config)?;
        let reporter = Arc::new(ViolationReporter::new()?);
        Ok(Self::new(validator, reporter))
    }

    pub fn validator(&self) -> &ChainValidator {
        &self.validator
    }

    pub fn reporter(&self) -> &Arc<ViolationReporter> {
        &self.reporter
    }

    /// Evaluate a chain for `hostname`, with the port when the adapter
    /// knows it.
    pub fn evaluate_chain<C: SpkiSource>(
        &self,
        hostname: &str,
        port: Option<u16>,
        chain: &[C],
    ) -> Action {
        let now = Utc::now();
        let (result, pin_set) = self.validator.evaluate(hostname, chain, now);

        if result.outcome == Outcome::Accepted {
            if let Some(pin) = &result.matched_pin {
                debug!(host = hostname, pin = %pin, "Pin validation succeeded");
            }
            return Action::Proceed;
        }

        let report = ViolationReport::new(&result, pin_set, port, now);
        let expected_pins = report.expected_pins.len();
        let enforce_mode = report.enforce_mode;
        self.reporter.report(report);

        match enforce_mode {
            EnforceMode::ReportOnly => {
                warn!(
                    host = hostname,
                    noted = result.noted_hostname.as_deref().unwrap_or(""),
                    "Pin validation failed (report-only, connection allowed)"
                );
                Action::Proceed
            }
            EnforceMode::Enforce => {
                error!(
                    host = hostname,
                    noted = result.noted_hostname.as_deref().unwrap_or(""),
                    presented = result.evaluated_chain.len(),
                    "Pin validation failed, blocking connection"
                );
                Action::Abort(result.failure(expected_pins))
            }
        }
    }
}

impl PinningAdapter for PinEnforcer {
    fn evaluate(&self, hostname: &str, chain: &[CertificateDer<'_>]) -> Action {
        self.evaluate_chain(hostname, None, chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::fingerprint::PublicKeyFingerprint;
    use crate::observers::FnObserver;
    use crate::test_support::self_signed;
    use crate::types::config::{DomainPinSet, UnpinnedPolicy};
    use std::sync::Mutex;

    const PIN_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    const PIN_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBA=";

    fn fp(pin: &str) -> PublicKeyFingerprint {
        pin.parse().unwrap()
    }

    fn recording_enforcer(
        config: PinSetConfig,
    ) -> (PinEnforcer, Arc<Mutex<Vec<ViolationReport>>>) {
        let enforcer = PinEnforcer::from_config(config).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        enforcer
            .reporter()
            .subscribe(FnObserver::new(move |report: &ViolationReport| {
                sink.lock().unwrap().push(report.clone());
                Ok::<(), ReportError>(())
            }));
        (enforcer, seen)
    }

    fn example_config(mode: EnforceMode) -> PinSetConfig {
        PinSetConfig::new().with_domain(
            "example.com",
            DomainPinSet::new()
                .pin(PIN_A)
                .enforce_mode(mode)
                .report_uri("https://reports.example.com/pin"),
        )
    }

    #[test]
    fn test_enforce_aborts_with_one_report() {
        let (enforcer, seen) = recording_enforcer(example_config(EnforceMode::Enforce));

        let action = enforcer.evaluate_chain("example.com", Some(443), &[fp(PIN_B)]);
        match action {
            Action::Abort(failure) => {
                assert_eq!(failure.hostname, "example.com");
                assert_eq!(failure.noted_hostname.as_deref(), Some("example.com"));
                assert_eq!(failure.evaluated_chain, vec![fp(PIN_B)]);
                assert_eq!(failure.expected_pins, 1);
            }
            Action::Proceed => panic!("enforced violation must abort"),
        }

        enforcer.reporter().flush();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].port, Some(443));
        assert_eq!(seen[0].expected_pins, vec![fp(PIN_A)]);
        assert_eq!(seen[0].report_uris, vec!["https://reports.example.com/pin"]);
    }

    #[test]
    fn test_report_only_proceeds_with_one_report() {
        let (enforcer, seen) = recording_enforcer(example_config(EnforceMode::ReportOnly));

        let action = enforcer.evaluate_chain("example.com", None, &[fp(PIN_B)]);
        assert_eq!(action, Action::Proceed);

        enforcer.reporter().flush();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].enforce_mode, EnforceMode::ReportOnly);
    }

    #[test]
    fn test_accepted_and_unpinned_do_not_report() {
        let (enforcer, seen) = recording_enforcer(example_config(EnforceMode::Enforce));

        assert_eq!(
            enforcer.evaluate_chain("example.com", None, &[fp(PIN_B), fp(PIN_A)]),
            Action::Proceed
        );
        assert_eq!(
            enforcer.evaluate_chain("other.com", None, &[fp(PIN_B)]),
            Action::Proceed
        );

        enforcer.reporter().flush();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fail_closed_policy_aborts_unconfigured_host() {
        let (enforcer, seen) = recording_enforcer(
            example_config(EnforceMode::Enforce).unpinned_policy(UnpinnedPolicy::Reject),
        );

        let action = enforcer.evaluate_chain("other.com", None, &[fp(PIN_A)]);
        match action {
            Action::Abort(failure) => {
                assert_eq!(failure.noted_hostname, None);
                assert_eq!(failure.expected_pins, 0);
            }
            Action::Proceed => panic!("unconfigured host must be rejected"),
        }

        enforcer.reporter().flush();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].expected_pins.is_empty());
    }

    #[test]
    fn test_adapter_trait_over_der_chain() {
        let leaf = self_signed("example.com");
        let leaf_der = leaf.cert.der().clone();
        let pin = leaf_der.spki_fingerprint().unwrap();
        let enforcer = PinEnforcer::from_config(PinSetConfig::new().with_domain(
            "example.com",
            DomainPinSet::new().pin_fingerprint(pin),
        ))
        .unwrap();

        let adapter: &dyn PinningAdapter = &enforcer;
        assert_eq!(adapter.evaluate("example.com", &[leaf_der]), Action::Proceed);

        let other = self_signed("example.com");
        assert!(adapter
            .evaluate("example.com", &[other.cert.der().clone()])
            .is_abort());
    }
}
