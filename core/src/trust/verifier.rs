//! Host-key fingerprint verification.
//!
//! Computes an OpenSSH-style `SHA256:<base64>` fingerprint over the raw
//! host key blob and compares it against the pinned record in the
//! [`TrustStore`]. Pure apart from the store lookup; the session manager
//! decides what to do with the verdict.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::store::{HostFingerprint, TrustStore};

/// Verdict of comparing an observed host key against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    /// A record exists and both hash and key type match.
    Match,
    /// No record exists for this identity (first contact).
    New,
    /// A record exists but the key differs (possible MITM).
    Changed,
}

/// The verdict plus a candidate record for the observed key, ready to be
/// pinned if the caller (or the user) accepts it.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub status: VerifyStatus,
    pub candidate: HostFingerprint,
}

/// Render the OpenSSH-style fingerprint of a raw host key blob.
pub fn fingerprint_sha256(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

/// Compare the observed host key against the pinned record.
pub fn verify(
    store: &TrustStore,
    host: &str,
    port: u16,
    key_type: &str,
    key_bytes: &[u8],
) -> VerifyOutcome {
    let hash = fingerprint_sha256(key_bytes);
    let status = match store.get(host, port) {
        None => VerifyStatus::New,
        Some(existing) if existing.hash == hash && existing.key_type == key_type => {
            VerifyStatus::Match
        }
        Some(_) => VerifyStatus::Changed,
    };

    let now = chrono::Utc::now().to_rfc3339();
    VerifyOutcome {
        status,
        candidate: HostFingerprint {
            host: host.to_string(),
            port,
            hash,
            hash_algorithm: "sha256".to_string(),
            key_type: key_type.to_string(),
            verified: false,
            added_at: now.clone(),
            last_seen: now,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir) -> TrustStore {
        TrustStore::open(tmp.path().join("known_hosts.json"))
    }

    #[test]
    fn fingerprint_has_sha256_prefix_and_no_padding() {
        let fp = fingerprint_sha256(b"some-host-key-blob");
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
        // SHA-256 digest is 32 bytes → 43 base64 chars without padding.
        assert_eq!(fp.len(), "SHA256:".len() + 43);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint_sha256(b"blob"), fingerprint_sha256(b"blob"));
        assert_ne!(fingerprint_sha256(b"blob"), fingerprint_sha256(b"other"));
    }

    #[test]
    fn unknown_host_is_new() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let outcome = verify(&store, "pi.local", 22, "ssh-ed25519", b"key-blob");
        assert_eq!(outcome.status, VerifyStatus::New);
        assert_eq!(outcome.candidate.host, "pi.local");
        assert_eq!(outcome.candidate.port, 22);
        assert_eq!(outcome.candidate.hash_algorithm, "sha256");
        assert!(!outcome.candidate.verified);
    }

    #[test]
    fn pinned_key_matches() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let first = verify(&store, "pi.local", 22, "ssh-ed25519", b"key-blob");
        let mut record = first.candidate.clone();
        record.verified = true;
        store.put(record).unwrap();

        let outcome = verify(&store, "pi.local", 22, "ssh-ed25519", b"key-blob");
        assert_eq!(outcome.status, VerifyStatus::Match);
    }

    #[test]
    fn different_key_is_changed() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let first = verify(&store, "pi.local", 22, "ssh-ed25519", b"old-key");
        store.put(first.candidate).unwrap();

        let outcome = verify(&store, "pi.local", 22, "ssh-ed25519", b"new-key");
        assert_eq!(outcome.status, VerifyStatus::Changed);
    }

    #[test]
    fn same_hash_different_key_type_is_changed() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let first = verify(&store, "pi.local", 22, "ssh-rsa", b"key-blob");
        store.put(first.candidate).unwrap();

        let outcome = verify(&store, "pi.local", 22, "ssh-ed25519", b"key-blob");
        assert_eq!(outcome.status, VerifyStatus::Changed);
    }

    #[test]
    fn different_port_is_separate_identity() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp);

        let first = verify(&store, "pi.local", 22, "ssh-ed25519", b"key-blob");
        store.put(first.candidate).unwrap();

        let outcome = verify(&store, "pi.local", 2222, "ssh-ed25519", b"key-blob");
        assert_eq!(outcome.status, VerifyStatus::New);
    }
}
