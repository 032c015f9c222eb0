//! Persisted host-key fingerprint store.
//!
//! One JSON document (`known_hosts.json` in the procHub config dir) maps
//! `host:port` identities to pinned fingerprints. Loads are lenient: a
//! missing or corrupt file yields an empty store with a warning, so a bad
//! document can never block connecting. Writes go through a temp sibling
//! file plus rename so readers never observe a torn record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::config_dir;
use crate::errors::PersistenceError;

/// A pinned host-key fingerprint. Identity is `(host, port)`; the store
/// keeps at most one record per identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostFingerprint {
    pub host: String,
    pub port: u16,
    /// Rendered digest, e.g. `SHA256:kJxyzd3...` (base64, no padding).
    pub hash: String,
    pub hash_algorithm: String,
    /// SSH key algorithm name, e.g. `ssh-ed25519`.
    pub key_type: String,
    /// False only while the key awaits a user decision; stored records
    /// are normally verified.
    pub verified: bool,
    pub added_at: String,
    pub last_seen: String,
}

impl HostFingerprint {
    /// The `host:port` identity key used in the persisted document.
    pub fn identity(&self) -> String {
        identity_key(&self.host, self.port)
    }
}

fn identity_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// The persisted document shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TrustDocument {
    hosts: HashMap<String, HostFingerprint>,
}

/// Thread-safe store of pinned host keys backed by a JSON file.
pub struct TrustStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, HostFingerprint>>,
}

impl TrustStore {
    /// Open the store at the default location,
    /// `<config dir>/known_hosts.json`.
    pub fn open_default() -> Self {
        Self::open(config_dir().join("known_hosts.json"))
    }

    /// Open the store at a specific path (used by tests).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_document(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Look up the pinned fingerprint for an identity.
    pub fn get(&self, host: &str, port: u16) -> Option<HostFingerprint> {
        self.entries
            .lock()
            .ok()?
            .get(&identity_key(host, port))
            .cloned()
    }

    /// Insert or replace the record for the fingerprint's identity.
    pub fn put(&self, fingerprint: HostFingerprint) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.insert(fingerprint.identity(), fingerprint);
            entries.clone()
        };
        self.persist(&snapshot)
    }

    /// Remove the record for an identity. Returns whether one existed.
    pub fn delete(&self, host: &str, port: u16) -> Result<bool, PersistenceError> {
        let (existed, snapshot) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let existed = entries.remove(&identity_key(host, port)).is_some();
            (existed, entries.clone())
        };
        if existed {
            self.persist(&snapshot)?;
        }
        Ok(existed)
    }

    /// All stored fingerprints, in no particular order.
    pub fn list(&self) -> Vec<HostFingerprint> {
        self.entries
            .lock()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Refresh `last_seen` on a matching record. No-op if absent.
    pub fn touch_last_seen(&self, host: &str, port: u16) -> Result<(), PersistenceError> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get_mut(&identity_key(host, port)) {
                Some(record) => record.last_seen = chrono::Utc::now().to_rfc3339(),
                None => return Ok(()),
            }
            entries.clone()
        };
        self.persist(&snapshot)
    }

    /// Write the document atomically: serialize to a temp sibling, then
    /// rename over the target.
    fn persist(&self, entries: &HashMap<String, HostFingerprint>) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let document = TrustDocument {
            hosts: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} host fingerprints to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// Load the document, returning an empty map if the file is missing or
/// corrupt.
fn load_document(path: &Path) -> HashMap<String, HostFingerprint> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<TrustDocument>(&contents) {
            Ok(document) => {
                debug!(
                    "Loaded {} host fingerprints from {}",
                    document.hosts.len(),
                    path.display()
                );
                document.hosts
            }
            Err(e) => {
                warn!("Failed to parse trust store at {}: {}", path.display(), e);
                HashMap::new()
            }
        },
        Err(_) => {
            debug!("No trust store file at {}", path.display());
            HashMap::new()
        }
    }
}
