//! # tlspin
//!
//! Public-key certificate pinning for outbound HTTPS clients.
//!
//! Hosts are pinned to the SHA-256 digests of certificate public keys (SPKI
//! fingerprints). A connection is accepted when any certificate in the
//! presented chain, leaf or intermediate, carries a pinned key, so pinning
//! survives certificate renewal as long as the key or the issuing
//! intermediate is kept.
//!
//! ## Features
//!
//! - **Pin set resolution**: exact hosts, `*.` wildcards and
//!   `include_subdomains` inheritance from a JSON configuration
//! - **Chain validation**: pure, synchronous, one result per chain
//! - **Enforce / report-only modes**: block violations or only report them
//! - **Asynchronous reporting**: violations fan out to observers on a
//!   background thread, never on the handshake path
//! - **Client adapters**: a rustls certificate verifier that aborts the
//!   handshake, and a request interceptor for stacks without a TLS hook
//! - **`http` feature**: pinned `reqwest` clients and a report-URI observer
//!
//! ## Quick Start
//!
//! ```rust
//! use tlspin::fingerprint::PublicKeyFingerprint;
//! use tlspin::validator::ChainValidator;
//! use tlspin::types::config::PinSetConfig;
//!
//! let config = PinSetConfig::from_json(r#"{
//!     "domains": {
//!         "example.com": {
//!             "pins": ["AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="],
//!             "include_subdomains": true
//!         }
//!     }
//! }"#).unwrap();
//! let validator = ChainValidator::from_config(config).unwrap();
//!
//! let pinned = PublicKeyFingerprint::from_bytes([0u8; 32]);
//! let other = PublicKeyFingerprint::from_bytes([7u8; 32]);
//!
//! assert!(validator.validate("api.example.com", &[other, pinned]).is_accepted());
//! assert!(!validator.validate("example.com", &[other]).is_accepted());
//! assert!(validator.validate("unpinned.org", &[other]).is_accepted());
//! ```
//!
//! In a TLS client, wrap the validator in a [`enforcer::PinEnforcer`] and
//! install [`adapters::verifier::PinningVerifier`] as the rustls server
//! certificate verifier.
//!
//! ## Error Handling
//!
//! Fallible operations return `Result<T, Error>` with [`error::Error`].
//! A blocked connection surfaces as [`error::PinningFailure`], a type of its
//! own so callers can tell it apart from other TLS failures.

pub mod adapters;
pub mod enforcer;
pub mod error;
pub mod fingerprint;
pub mod observers;
pub mod reporter;
pub mod resolver;
pub mod types;
pub mod validator;

#[cfg(test)]
mod test_support;
