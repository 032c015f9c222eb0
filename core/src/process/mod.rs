//! Remote PM2 process control over the managed session.
//!
//! Every operation is one remote command; listings and the PM2
//! presence probe are cached briefly so a UI polling for status does
//! not hammer the session with redundant round-trips.

pub mod parser;
pub mod stats;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::ProcessError;
use crate::session::CommandExecutor;

pub use types::{ActionOutcome, ProcessStatus, RemoteProcessRecord, SystemStats};

/// Probe for the PM2 binary; exit 0 plus a path on stdout means present.
pub const PM2_PROBE_COMMAND: &str = "command -v pm2";

const LIST_COMMAND: &str = "pm2 jlist";
const TABLE_COMMAND: &str = "pm2 list";

const DEFAULT_LIST_TTL: Duration = Duration::from_secs(5);
const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(60);

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

#[derive(Default)]
struct Caches {
    list: Option<CacheEntry<Vec<RemoteProcessRecord>>>,
    manager_present: Option<CacheEntry<bool>>,
}

/// Drives PM2 on the remote host through the command executor.
pub struct RemoteProcessController {
    executor: Arc<CommandExecutor>,
    caches: tokio::sync::Mutex<Caches>,
    list_ttl: Duration,
    probe_ttl: Duration,
}

impl RemoteProcessController {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self::with_ttls(executor, DEFAULT_LIST_TTL, DEFAULT_PROBE_TTL)
    }

    /// Controller with explicit cache lifetimes (used by tests).
    pub fn with_ttls(
        executor: Arc<CommandExecutor>,
        list_ttl: Duration,
        probe_ttl: Duration,
    ) -> Self {
        Self {
            executor,
            caches: tokio::sync::Mutex::new(Caches::default()),
            list_ttl,
            probe_ttl,
        }
    }

    /// Whether PM2 is installed on the remote host, cached per
    /// [`DEFAULT_PROBE_TTL`].
    pub async fn manager_installed(&self) -> Result<bool, ProcessError> {
        let mut caches = self.caches.lock().await;
        self.probe_manager(&mut caches).await
    }

    /// List the PM2-managed processes.
    ///
    /// Prefers `pm2 jlist` JSON and falls back to parsing the
    /// `pm2 list` table when no JSON can be extracted. Results are
    /// cached per [`DEFAULT_LIST_TTL`]; a cached negative probe fails
    /// fast with [`ProcessError::ManagerNotInstalled`].
    pub async fn list(&self) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
        // The lock is held across the remote round-trips so concurrent
        // pollers share one fetch instead of racing.
        let mut caches = self.caches.lock().await;

        if !self.probe_manager(&mut caches).await? {
            return Err(ProcessError::ManagerNotInstalled);
        }
        if let Some(entry) = &caches.list {
            if entry.is_fresh(self.list_ttl) {
                return Ok(entry.value.clone());
            }
        }

        let records = self.fetch_listing().await?;
        caches.list = Some(CacheEntry::new(records.clone()));
        Ok(records)
    }

    pub async fn start(&self, name: &str) -> Result<ActionOutcome, ProcessError> {
        self.action("start", name).await
    }

    pub async fn stop(&self, name: &str) -> Result<ActionOutcome, ProcessError> {
        self.action("stop", name).await
    }

    pub async fn restart(&self, name: &str) -> Result<ActionOutcome, ProcessError> {
        self.action("restart", name).await
    }

    pub async fn delete(&self, name: &str) -> Result<ActionOutcome, ProcessError> {
        self.action("delete", name).await
    }

    /// Fetch the last `lines` log lines for a process, without
    /// streaming.
    pub async fn logs(&self, name: &str, lines: u32) -> Result<Vec<String>, ProcessError> {
        let command = format!(
            "pm2 logs {} --lines {} --nostream",
            shell_quote(name),
            lines
        );
        let output = self.executor.execute(&command, None).await?;
        Ok(output.stdout.lines().map(str::to_string).collect())
    }

    /// Memory statistics of the remote host itself.
    pub async fn system_stats(&self) -> Result<SystemStats, ProcessError> {
        let output = self.executor.execute("free -m", None).await?;
        stats::parse_free_output(&output.stdout)
    }

    async fn action(&self, verb: &str, name: &str) -> Result<ActionOutcome, ProcessError> {
        let command = format!("pm2 {verb} {}", shell_quote(name));
        let output = self.executor.execute(&command, None).await?;

        let success = output.exit_code == 0 && output.stderr.trim().is_empty();
        let message = if success {
            format!("{verb} succeeded for {name}")
        } else {
            let stderr = output.stderr.trim();
            if stderr.is_empty() {
                format!("{verb} failed for {name} (exit {})", output.exit_code)
            } else {
                stderr.to_string()
            }
        };

        if success {
            // The listing is stale the moment a process changes state.
            self.caches.lock().await.list = None;
        } else {
            warn!("pm2 {verb} {name} failed: {message}");
        }
        Ok(ActionOutcome { success, message })
    }

    async fn probe_manager(&self, caches: &mut Caches) -> Result<bool, ProcessError> {
        if let Some(entry) = &caches.manager_present {
            if entry.is_fresh(self.probe_ttl) {
                return Ok(entry.value);
            }
        }
        let output = self.executor.execute(PM2_PROBE_COMMAND, None).await?;
        let present = output.exit_code == 0 && !output.stdout.trim().is_empty();
        if !present {
            debug!("PM2 not found on remote host");
        }
        caches.manager_present = Some(CacheEntry::new(present));
        Ok(present)
    }

    async fn fetch_listing(&self) -> Result<Vec<RemoteProcessRecord>, ProcessError> {
        let output = self.executor.execute(LIST_COMMAND, None).await?;
        match parser::parse_listing(&parser::JSON_CHAIN, &output.stdout) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!("jlist output unparseable ({e}), falling back to table listing");
                let table = self.executor.execute(TABLE_COMMAND, None).await?;
                parser::ParseStrategy::Table.parse(&table.stdout)
            }
        }
    }
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
