use serde::{Deserialize, Serialize};

/// Lifecycle state of a PM2-managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopped,
    Stopping,
    Errored,
    Unknown,
}

impl ProcessStatus {
    /// Map a PM2 status string; anything unrecognized becomes `Unknown`.
    pub fn from_pm2(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "online" => Self::Online,
            "stopped" => Self::Stopped,
            "stopping" => Self::Stopping,
            "errored" => Self::Errored,
            _ => Self::Unknown,
        }
    }
}

impl Default for ProcessStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// One process as reported by the remote PM2 daemon, normalized from
/// whichever listing format could be parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProcessRecord {
    pub name: String,
    pub id: i64,
    pub status: ProcessStatus,
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub uptime_seconds: u64,
    pub restart_count: u64,
    /// OS pid; absent when the process is not running.
    pub pid: Option<u32>,
}

/// Result of a start/stop/restart/delete action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

/// Memory figures from the remote host, in megabytes.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub mem_total_mb: u64,
    pub mem_used_mb: u64,
    pub mem_free_mb: u64,
}
