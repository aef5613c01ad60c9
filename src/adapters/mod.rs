//! Client integrations.
//!
//! Both adapters delegate to [`PinEnforcer`](crate::enforcer::PinEnforcer)
//! and implement [`PinningAdapter`](crate::enforcer::PinningAdapter).

#[cfg(feature = "http")]
pub mod client;
pub mod interceptor;
pub mod verifier;
