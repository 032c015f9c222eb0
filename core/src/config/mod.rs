pub mod expand;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// SSH connection configuration for the managed session.
///
/// - `port`: defaults to 22.
/// - `auth_method`: `"password"`, `"key"` or `"agent"`.
/// - `allow_unverified_host_keys`: when true, a key seen for the first
///   time is pinned automatically. A changed key is never accepted
///   automatically regardless of this flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
    #[serde(default)]
    pub allow_unverified_host_keys: bool,
    /// TCP connect timeout in seconds (handshake and auth run after this).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            username: String::new(),
            auth_method: String::new(),
            password: None,
            key_path: None,
            allow_unverified_host_keys: false,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl SshConfig {
    /// Return a copy with all `${env:...}` placeholders and `~` expanded.
    pub fn expand(mut self) -> Self {
        self.host = expand::expand_env_placeholders(&self.host);
        self.username = expand::expand_env_placeholders(&self.username);
        self.key_path = self.key_path.map(|s| {
            // Strip surrounding quotes — users often paste paths like "C:\...\key"
            let stripped = s.trim().trim_matches('"').trim_matches('\'');
            expand::expand_tilde(&expand::expand_env_placeholders(stripped))
        });
        self.password = self.password.map(|s| expand::expand_env_placeholders(&s));
        self
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Get the platform config directory for procHub.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("prochub");
    }
    if let Ok(home) = std::env::var("HOME") {
        #[cfg(target_os = "macos")]
        return PathBuf::from(&home)
            .join("Library")
            .join("Application Support")
            .join("prochub");
        #[cfg(not(target_os = "macos"))]
        return PathBuf::from(&home).join(".config").join("prochub");
    }
    PathBuf::from(".config").join("prochub")
}
