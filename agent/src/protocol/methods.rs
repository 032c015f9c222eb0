use serde::{Deserialize, Serialize};

use prochub_core::config::SshConfig;
use prochub_core::process::RemoteProcessRecord;
use prochub_core::session::{ConnectionState, PendingFingerprint};

// ── initialize ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub process_manager: String,
    pub notifications: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    pub protocol_version: String,
    pub agent_version: String,
    pub capabilities: Capabilities,
}

// ── session.connect / session.test ──────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConnectParams {
    pub config: SshConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConnectResult {
    pub connected: bool,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionTestResult {
    pub success: bool,
    pub manager_installed: bool,
}

// ── session.status ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResult {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_host_key: Option<PendingFingerprint>,
    /// Result of the (rate-limited) liveness probe.
    pub alive: bool,
}

// ── exec.run ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRunParams {
    pub command: String,
    pub timeout_secs: Option<u64>,
}

// ── process.* ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessActionParams {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessLogsParams {
    pub name: String,
    #[serde(default = "default_log_lines")]
    pub lines: u32,
}

fn default_log_lines() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessListResult {
    pub success: bool,
    pub manager_installed: bool,
    pub processes: Vec<RemoteProcessRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessLogsResult {
    pub name: String,
    pub lines: Vec<String>,
}

// ── hostkey.* ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HostKeySaveParams {
    pub fingerprint: prochub_core::trust::HostFingerprint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostKeyDeleteParams {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

// ── health.check ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub status: String,
    pub uptime_secs: u64,
    pub connected: bool,
}
