//! Host-key trust: the persisted fingerprint store and the verifier
//! that implements trust-on-first-use pinning.

pub mod store;
pub mod verifier;

pub use store::{HostFingerprint, TrustStore};
pub use verifier::{verify, VerifyOutcome, VerifyStatus};
