//! Pinned `reqwest` clients.

use std::sync::Arc;

use crate::adapters::verifier::PinningVerifier;
use crate::enforcer::PinEnforcer;
use crate::error::{Error, PinningFailure};

/// Build an async client whose TLS handshakes go through `verifier`.
pub fn pinned_client(verifier: PinningVerifier) -> Result<reqwest::Client, Error> {
    let tls = verifier.client_config()?;
    let client = reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .build()?;
    Ok(client)
}

/// Blocking counterpart of [`pinned_client`].
pub fn pinned_blocking_client(
    verifier: PinningVerifier,
) -> Result<reqwest::blocking::Client, Error> {
    let tls = verifier.client_config()?;
    let client = reqwest::blocking::Client::builder()
        .use_preconfigured_tls(tls)
        .build()?;
    Ok(client)
}

/// Async client pinning on top of WebPKI validation with the Mozilla roots.
pub fn pinned_client_with_webpki_roots(
    enforcer: Arc<PinEnforcer>,
) -> Result<reqwest::Client, Error> {
    pinned_client(PinningVerifier::with_webpki_roots(enforcer)?)
}

/// The pinning failure behind a request error, if that is what failed it.
pub fn pinning_failure(err: &reqwest::Error) -> Option<&PinningFailure> {
    PinningFailure::find_in(err)
}
