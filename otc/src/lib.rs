//! Custodia One-Time-Code Verifier
//!
//! Ephemeral, keyed, TTL'd secrets gating sensitive operations. Codes are
//! issued per `(identifier, purpose)` key with a reissue cooldown, verified
//! against an attempt limit, and garbage-collected on expiry.

pub mod verifier;

pub use verifier::{OtcConfig, OtcError, OtcResult, OtcVerifier};
