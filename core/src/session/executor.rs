//! Command execution with failure classification.
//!
//! Remote commands that fail at the application level (non-zero exit,
//! stderr output) are ordinary results. Failures of the channel or
//! transport itself are fatal: the session is unusable afterwards, so
//! the executor tears it down and notifies subscribers. A timeout is
//! deliberately not fatal; the session survives and the caller decides
//! what to do.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::errors::SessionError;

use super::manager::SessionManager;
use super::transport::CommandOutput;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs commands on the managed session and handles fatal failures.
pub struct CommandExecutor {
    session: Arc<SessionManager>,
    default_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Run `command`, using the default timeout when none is given.
    ///
    /// On a fatal failure the session is torn down before the error is
    /// returned, so a follow-up call fails with
    /// [`SessionError::NotConnected`] instead of hanging on a dead
    /// channel.
    pub async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SessionError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        match self.session.exec(command, timeout).await {
            Ok(output) => Ok(output),
            Err(e) if is_fatal_error(&e) => {
                let reason = format!("Fatal channel error: {e}");
                warn!("{reason}, disconnecting");
                self.session.force_disconnect(&reason).await;
                match e {
                    SessionError::ChannelFatal(_) => Err(e),
                    other => Err(SessionError::ChannelFatal(other.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether an exec failure means the session itself is dead.
fn is_fatal_error(error: &SessionError) -> bool {
    match error {
        SessionError::ChannelFatal(_) => true,
        SessionError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::UnexpectedEof
        ),
        SessionError::ConnectFailed(msg) => is_fatal_message(msg),
        // A timeout or a refused host key says nothing about channel
        // health; NotConnected means there is nothing to tear down.
        SessionError::Timeout(_)
        | SessionError::NotConnected
        | SessionError::AuthenticationFailed(_)
        | SessionError::HostKeyRejected { .. } => false,
    }
}

/// Heuristic for libssh2 error strings that indicate a dead transport.
fn is_fatal_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["channel", "transport", "disconnect", "banner", "broken pipe", "connection reset", "eof"]
        .iter()
        .any(|needle| lower.contains(needle))
}
