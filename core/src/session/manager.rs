//! The single managed session.
//!
//! At most one live SSH connection exists at a time. All state mutation
//! happens behind one async mutex, which also serializes command
//! execution on the session. Blocking libssh2 work is bridged onto the
//! runtime with `spawn_blocking`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::config::SshConfig;
use crate::errors::{PersistenceError, SessionError};
use crate::notify::{Notifier, SessionEvent};
use crate::process::PM2_PROBE_COMMAND;
use crate::trust::{verify, HostFingerprint, TrustStore, VerifyStatus};

use super::transport::{CommandOutput, Connector, Transport};

/// Minimum interval between liveness probes; within the window
/// [`SessionManager::verify_active`] returns the previous verdict.
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Timeout for the liveness probe command.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the PM2 presence check during `test_connection`.
const TEST_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Snapshot of the connection state. Handed out by value; only the
/// session manager mutates the live instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub host: Option<String>,
    pub username: Option<String>,
    pub connection_time: Option<String>,
    pub last_error: Option<ConnectionError>,
}

/// The most recent connection-level failure, kept for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionError {
    pub message: String,
    pub details: Option<String>,
    pub timestamp: String,
}

/// A host key awaiting a user decision. At most one exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFingerprint {
    pub fingerprint: HostFingerprint,
    /// True when a pinned key changed, false for first contact.
    pub changed: bool,
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    pending: Option<PendingFingerprint>,
    last_probe: Option<(Instant, bool)>,
}

/// Owns the single SSH session, its state machine, and the TOFU
/// host-key decision made during connect.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    trust: Arc<TrustStore>,
    notifier: Arc<Notifier>,
    inner: tokio::sync::Mutex<Inner>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        trust: Arc<TrustStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            connector,
            trust,
            notifier,
            inner: tokio::sync::Mutex::new(Inner {
                transport: None,
                state: ConnectionState::default(),
                pending: None,
                last_probe: None,
            }),
        }
    }

    /// Subscribe to connection-state and host-key events.
    pub fn subscribe(&self) -> UnboundedReceiver<SessionEvent> {
        self.notifier.subscribe()
    }

    /// Establish a new session, tearing down any existing one first.
    ///
    /// The host key presented during the handshake is verified against
    /// the trust store before credentials are sent:
    /// - a matching pinned key proceeds (refreshing `last_seen`);
    /// - a first-contact key is pinned automatically only when
    ///   `allow_unverified_host_keys` is set;
    /// - anything else records a pending fingerprint, emits a
    ///   verification-needed event and fails with
    ///   [`SessionError::HostKeyRejected`]. A changed key is never
    ///   accepted automatically.
    pub async fn connect(&self, config: SshConfig) -> Result<ConnectionState, SessionError> {
        let config = config.expand();
        let mut inner = self.inner.lock().await;

        if inner.transport.is_some() {
            info!("Replacing existing session with new connection");
            Self::teardown(&mut inner, &self.notifier);
        }
        inner.pending = None;

        let connector = self.connector.clone();
        let open_config = config.clone();
        let handshake = match tokio::task::spawn_blocking(move || connector.open(&open_config))
            .await
            .unwrap_or_else(|e| {
                Err(SessionError::ConnectFailed(format!("Connect task failed: {e}")))
            }) {
            Ok(h) => h,
            Err(e) => {
                Self::record_error(&mut inner.state, &e.to_string(), None);
                return Err(e);
            }
        };

        let key = handshake.host_key().clone();
        let outcome = verify(&self.trust, &config.host, config.port, &key.key_type, &key.key_bytes);
        match outcome.status {
            VerifyStatus::Match => {
                if let Err(e) = self.trust.touch_last_seen(&config.host, config.port) {
                    warn!(
                        "Failed to refresh last_seen for {}:{}: {e}",
                        config.host, config.port
                    );
                }
            }
            VerifyStatus::New if config.allow_unverified_host_keys => {
                let mut record = outcome.candidate.clone();
                record.verified = true;
                if let Err(e) = self.trust.put(record) {
                    // The session still proceeds; only the pin is lost.
                    warn!("Failed to pin host key for {}: {e}", config.host);
                } else {
                    info!(
                        "Pinned new host key for {}:{} ({})",
                        config.host, config.port, outcome.candidate.hash
                    );
                }
            }
            status => {
                let changed = status == VerifyStatus::Changed;
                if changed {
                    warn!(
                        "Host key for {}:{} CHANGED (was pinned, now {})",
                        config.host, config.port, outcome.candidate.hash
                    );
                }
                inner.pending = Some(PendingFingerprint {
                    fingerprint: outcome.candidate.clone(),
                    changed,
                });
                Self::record_error(
                    &mut inner.state,
                    "Host key verification required",
                    Some(outcome.candidate.hash.clone()),
                );
                self.notifier.emit(SessionEvent::HostKeyVerificationNeeded {
                    fingerprint: outcome.candidate,
                    changed,
                });
                // Dropping the handshake abandons the unauthenticated
                // connection.
                return Err(SessionError::HostKeyRejected {
                    host: config.host,
                    port: config.port,
                    changed,
                });
            }
        }

        let auth_config = config.clone();
        let transport =
            match tokio::task::spawn_blocking(move || handshake.authenticate(&auth_config))
                .await
                .unwrap_or_else(|e| {
                    Err(SessionError::ConnectFailed(format!("Auth task failed: {e}")))
                }) {
                Ok(t) => t,
                Err(e) => {
                    Self::record_error(&mut inner.state, &e.to_string(), None);
                    return Err(e);
                }
            };

        inner.transport = Some(transport);
        inner.state = ConnectionState {
            connected: true,
            host: Some(config.host.clone()),
            username: Some(config.username.clone()),
            connection_time: Some(chrono::Utc::now().to_rfc3339()),
            last_error: None,
        };
        inner.last_probe = Some((Instant::now(), true));
        info!("Connected to {}@{}:{}", config.username, config.host, config.port);
        self.notifier
            .emit(SessionEvent::ConnectionChanged { connected: true });

        Ok(inner.state.clone())
    }

    /// Close the session. Idempotent; disconnecting while disconnected
    /// is a no-op and the notifier only fires on a real transition.
    pub async fn disconnect(&self) -> ConnectionState {
        let mut inner = self.inner.lock().await;
        Self::teardown(&mut inner, &self.notifier);
        inner.state.clone()
    }

    /// Tear down after a fatal transport failure, recording the reason.
    pub async fn force_disconnect(&self, reason: &str) -> ConnectionState {
        let mut inner = self.inner.lock().await;
        Self::record_error(&mut inner.state, reason, None);
        Self::teardown(&mut inner, &self.notifier);
        inner.state.clone()
    }

    /// Snapshot of the current connection state.
    pub async fn status(&self) -> ConnectionState {
        self.inner.lock().await.state.clone()
    }

    /// The host key awaiting a decision, if any.
    pub async fn pending_fingerprint(&self) -> Option<PendingFingerprint> {
        self.inner.lock().await.pending.clone()
    }

    /// Accept the pending host key: persist it as verified and clear
    /// the pending slot. Returns the pinned record, or `None` when
    /// nothing was pending. On a persistence failure the pending slot
    /// is kept so the user can retry.
    pub async fn accept_pending_fingerprint(
        &self,
    ) -> Result<Option<HostFingerprint>, PersistenceError> {
        let mut inner = self.inner.lock().await;
        let Some(pending) = inner.pending.take() else {
            return Ok(None);
        };

        let mut record = pending.fingerprint.clone();
        record.verified = true;
        if let Err(e) = self.trust.put(record.clone()) {
            inner.pending = Some(pending);
            return Err(e);
        }
        info!(
            "Accepted host key for {}:{} ({})",
            record.host, record.port, record.hash
        );
        Ok(Some(record))
    }

    /// Reject the pending host key: clear the slot without persisting.
    pub async fn reject_pending_fingerprint(&self) -> Option<HostFingerprint> {
        let mut inner = self.inner.lock().await;
        let pending = inner.pending.take()?;
        info!(
            "Rejected host key for {}:{}",
            pending.fingerprint.host, pending.fingerprint.port
        );
        Some(pending.fingerprint)
    }

    /// Run a command on the live session. Raw access used by the
    /// command executor; callers wanting failure classification go
    /// through [`super::CommandExecutor`].
    pub async fn exec(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        let mut inner = self.inner.lock().await;
        Self::exec_locked(&mut inner, command, timeout).await
    }

    /// Probe whether the session is still alive, rate-limited to one
    /// probe per [`PROBE_INTERVAL`]. A failed probe tears the session
    /// down and notifies subscribers.
    pub async fn verify_active(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.transport.is_none() {
            return false;
        }
        if let Some((at, verdict)) = inner.last_probe {
            if at.elapsed() < PROBE_INTERVAL {
                return verdict;
            }
        }

        let result = Self::exec_locked(&mut inner, "echo ok", PROBE_TIMEOUT).await;
        let alive = matches!(&result, Ok(out) if out.exit_code == 0);
        if !alive {
            let reason = match result {
                Ok(out) => format!("Liveness probe exited with {}", out.exit_code),
                Err(e) => format!("Liveness probe failed: {e}"),
            };
            warn!("{reason}, tearing down session");
            Self::record_error(&mut inner.state, &reason, None);
            Self::teardown(&mut inner, &self.notifier);
        } else {
            inner.last_probe = Some((Instant::now(), true));
        }
        alive
    }

    /// Connect with `config`, probe PM2 presence and tear the probe
    /// session down again. Never touches the managed session, the
    /// pending slot or the trust store; the same host-key policy
    /// applies but nothing is recorded.
    pub async fn test_connection(&self, config: SshConfig) -> Result<bool, SessionError> {
        let config = config.expand();
        let connector = self.connector.clone();
        let trust = self.trust.clone();

        tokio::task::spawn_blocking(move || {
            let handshake = connector.open(&config)?;
            let key = handshake.host_key().clone();
            let outcome = verify(&trust, &config.host, config.port, &key.key_type, &key.key_bytes);
            let accepted = match outcome.status {
                VerifyStatus::Match => true,
                VerifyStatus::New => config.allow_unverified_host_keys,
                VerifyStatus::Changed => false,
            };
            if !accepted {
                return Err(SessionError::HostKeyRejected {
                    host: config.host.clone(),
                    port: config.port,
                    changed: outcome.status == VerifyStatus::Changed,
                });
            }

            let mut transport = handshake.authenticate(&config)?;
            let probe = transport.exec(PM2_PROBE_COMMAND, TEST_PROBE_TIMEOUT);
            transport.close();

            let present =
                matches!(probe, Ok(out) if out.exit_code == 0 && !out.stdout.trim().is_empty());
            Ok(present)
        })
        .await
        .unwrap_or_else(|e| {
            Err(SessionError::ConnectFailed(format!("Test task failed: {e}")))
        })
    }

    async fn exec_locked(
        inner: &mut Inner,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        let mut transport = inner.transport.take().ok_or(SessionError::NotConnected)?;
        let command = command.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let output = transport.exec(&command, timeout);
            (transport, output)
        })
        .await;

        match result {
            Ok((transport, output)) => {
                // The transport survives timeouts and command failures;
                // fatal classification is the executor's job.
                inner.transport = Some(transport);
                output
            }
            Err(e) => Err(SessionError::ChannelFatal(format!("Exec task failed: {e}"))),
        }
    }

    fn teardown(inner: &mut Inner, notifier: &Notifier) {
        if let Some(mut transport) = inner.transport.take() {
            transport.close();
        }
        inner.last_probe = None;
        inner.state.connection_time = None;
        if inner.state.connected {
            inner.state.connected = false;
            notifier.emit(SessionEvent::ConnectionChanged { connected: false });
        }
    }

    fn record_error(state: &mut ConnectionState, message: &str, details: Option<String>) {
        state.last_error = Some(ConnectionError {
            message: message.to_string(),
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
}
