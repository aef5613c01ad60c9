//! Built-in [`ViolationObserver`] implementations.

use std::fmt;

use tracing::warn;

use crate::error::ReportError;
use crate::reporter::ViolationObserver;
use crate::types::report::ViolationReport;

/// Logs every report as a one-line summary at `WARN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ViolationObserver for LogObserver {
    fn on_violation(&self, report: &ViolationReport) -> Result<(), ReportError> {
        warn!(
            host = %report.hostname,
            noted = report.noted_hostname.as_deref().unwrap_or(""),
            mode = %report.enforce_mode,
            "{}",
            report.summary()
        );
        Ok(())
    }
}

/// Adapts a closure into an observer.
///
/// ```
/// use tlspin::observers::FnObserver;
/// use tlspin::reporter::ViolationReporter;
/// use tlspin::types::report::ViolationReport;
///
/// let reporter = ViolationReporter::new().unwrap();
/// reporter.subscribe(FnObserver::new(|report: &ViolationReport| {
///     eprintln!("{}", report.summary());
///     Ok(())
/// }));
/// ```
pub struct FnObserver<F> {
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&ViolationReport) -> Result<(), ReportError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnObserver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}

impl<F> ViolationObserver for FnObserver<F>
where
    F: Fn(&ViolationReport) -> Result<(), ReportError> + Send + Sync,
{
    fn on_violation(&self, report: &ViolationReport) -> Result<(), ReportError> {
        (self.f)(report)
    }
}

#[cfg(feature = "http")]
pub use self::report_uri::ReportUriObserver;

#[cfg(feature = "http")]
mod report_uri {
    use std::sync::OnceLock;
    use std::time::Duration;

    use reqwest::blocking::Client;
    use tracing::{debug, warn};

    use crate::error::ReportError;
    use crate::reporter::ViolationObserver;
    use crate::types::report::ViolationReport;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// POSTs each report as JSON to the pinned domain's `report_uris`, plus
    /// any URIs configured on the observer itself.
    ///
    /// Delivery to one URI does not depend on the others. The HTTP client is
    /// created on first use, on the reporter's worker thread.
    #[derive(Debug)]
    pub struct ReportUriObserver {
        default_uris: Vec<String>,
        timeout: Duration,
        client: OnceLock<Client>,
    }

    impl Default for ReportUriObserver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ReportUriObserver {
        pub fn new() -> Self {
            Self {
                default_uris: Vec::new(),
                timeout: DEFAULT_TIMEOUT,
                client: OnceLock::new(),
            }
        }

        /// Also send every report to `uri`, whatever domain it concerns.
        pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
            self.default_uris.push(uri.into());
            self
        }

        pub fn timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        fn client(&self) -> Result<&Client, ReportError> {
            if let Some(client) = self.client.get() {
                return Ok(client);
            }
            let client = Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| ReportError::Delivery {
                    uri: String::new(),
                    message: e.to_string(),
                })?;
            Ok(self.client.get_or_init(|| client))
        }

        fn post(client: &Client, uri: &str, report: &ViolationReport) -> Result<(), ReportError> {
            client
                .post(uri)
                .json(report)
                .send()
                .and_then(|response| response.error_for_status())
                .map(|_| ())
                .map_err(|e| ReportError::Delivery {
                    uri: uri.to_string(),
                    message: e.to_string(),
                })
        }
    }

    impl ViolationObserver for ReportUriObserver {
        fn on_violation(&self, report: &ViolationReport) -> Result<(), ReportError> {
            let mut uris: Vec<&str> = Vec::new();
            for uri in self.default_uris.iter().chain(&report.report_uris) {
                if !uris.contains(&uri.as_str()) {
                    uris.push(uri);
                }
            }
            if uris.is_empty() {
                return Ok(());
            }

            let client = self.client()?;
            let mut first_failure = None;
            for uri in uris {
                match Self::post(client, uri, report) {
                    Ok(()) => debug!(uri, host = %report.hostname, "Violation report delivered"),
                    Err(e) if first_failure.is_none() => first_failure = Some(e),
                    Err(e) => warn!(error = %e, "Violation report delivery failed"),
                }
            }
            first_failure.map_or(Ok(()), Err)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::PublicKeyFingerprint;
    use crate::reporter::ViolationReporter;
    use crate::types::config::EnforceMode;
    use chrono::Utc;
    use std::sync::mpsc;

    fn sample_report() -> ViolationReport {
        ViolationReport {
            hostname: "example.com".to_string(),
            port: None,
            noted_hostname: Some("example.com".to_string()),
            include_subdomains: false,
            enforce_mode: EnforceMode::Enforce,
            timestamp: Utc::now(),
            evaluated_chain: vec![PublicKeyFingerprint::from_bytes([2u8; 32])],
            expected_pins: vec![PublicKeyFingerprint::from_bytes([1u8; 32])],
            report_uris: vec![],
        }
    }

    #[test]
    fn test_log_observer() {
        assert!(LogObserver.on_violation(&sample_report()).is_ok());
    }

    #[test]
    fn test_fn_observer_through_reporter() {
        let (tx, rx) = mpsc::channel();
        let reporter = ViolationReporter::new().unwrap();
        reporter.subscribe(LogObserver);
        reporter.subscribe(FnObserver::new(move |report: &ViolationReport| {
            tx.send(report.hostname.clone())
                .map_err(|e| ReportError::Rejected(e.to_string()))
        }));

        reporter.report(sample_report());
        reporter.flush();
        assert_eq!(rx.try_recv().unwrap(), "example.com");
    }

    #[test]
    fn test_fn_observer_error_propagates_to_caller() {
        let observer = FnObserver::new(|_: &ViolationReport| {
            Err(ReportError::Rejected("collector offline".to_string()))
        });
        assert!(matches!(
            observer.on_violation(&sample_report()),
            Err(ReportError::Rejected(_))
        ));
    }
}
