//! Scripted connector and transport for tests.
//!
//! Sessions are queued on the connector ahead of time; each `open`
//! pops the next one. Commands pop scripted responses in order and
//! are recorded in a shared log so tests can assert on exactly what
//! was sent to the remote side.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SshConfig;
use crate::errors::SessionError;

use super::transport::{CommandOutput, Connector, HandshakeSession, HostKey, Transport};

/// Build a [`CommandOutput`] in one line.
pub fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

/// One scripted reply to an exec call.
#[derive(Debug)]
pub enum ScriptedResponse {
    Output(CommandOutput),
    Error(SessionError),
}

/// Script for one session: host key, optional auth failure and the
/// exec responses in order. Commands past the end of the script get an
/// empty success.
pub struct ScriptedSession {
    key_type: String,
    key_bytes: Vec<u8>,
    auth_error: Option<String>,
    responses: VecDeque<ScriptedResponse>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            key_type: "ssh-ed25519".to_string(),
            key_bytes: b"scripted-host-key".to_vec(),
            auth_error: None,
            responses: VecDeque::new(),
        }
    }

    /// Present a different host key blob.
    pub fn with_key(mut self, key_bytes: &[u8]) -> Self {
        self.key_bytes = key_bytes.to_vec();
        self
    }

    pub fn with_key_type(mut self, key_type: &str) -> Self {
        self.key_type = key_type.to_string();
        self
    }

    /// Fail authentication with this message.
    pub fn with_auth_error(mut self, message: &str) -> Self {
        self.auth_error = Some(message.to_string());
        self
    }

    /// Queue a successful exec response.
    pub fn with_output(mut self, out: CommandOutput) -> Self {
        self.responses.push_back(ScriptedResponse::Output(out));
        self
    }

    /// Queue a failing exec response.
    pub fn with_error(mut self, err: SessionError) -> Self {
        self.responses.push_back(ScriptedResponse::Error(err));
        self
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct SharedLog {
    exec_log: Vec<String>,
    close_count: usize,
}

/// Connector handing out pre-scripted sessions.
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    log: Arc<Mutex<SharedLog>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            log: Arc::new(Mutex::new(SharedLog::default())),
        }
    }

    /// Queue the script for the next `open` call.
    pub fn push_session(&self, session: ScriptedSession) {
        self.sessions.lock().unwrap().push_back(session);
    }

    /// Every command executed so far, across all sessions, in order.
    pub fn exec_log(&self) -> Vec<String> {
        self.log.lock().unwrap().exec_log.clone()
    }

    /// How many transports have been closed.
    pub fn close_count(&self) -> usize {
        self.log.lock().unwrap().close_count
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, _config: &SshConfig) -> Result<Box<dyn HandshakeSession>, SessionError> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SessionError::ConnectFailed("no scripted session queued".into()))?;
        Ok(Box::new(ScriptedHandshake {
            host_key: HostKey {
                key_type: session.key_type,
                key_bytes: session.key_bytes,
            },
            auth_error: session.auth_error,
            responses: session.responses,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedHandshake {
    host_key: HostKey,
    auth_error: Option<String>,
    responses: VecDeque<ScriptedResponse>,
    log: Arc<Mutex<SharedLog>>,
}

impl HandshakeSession for ScriptedHandshake {
    fn host_key(&self) -> &HostKey {
        &self.host_key
    }

    fn authenticate(
        self: Box<Self>,
        _config: &SshConfig,
    ) -> Result<Box<dyn Transport>, SessionError> {
        if let Some(message) = self.auth_error {
            return Err(SessionError::AuthenticationFailed(message));
        }
        Ok(Box::new(ScriptedTransport {
            responses: self.responses,
            log: self.log,
            closed: false,
        }))
    }
}

struct ScriptedTransport {
    responses: VecDeque<ScriptedResponse>,
    log: Arc<Mutex<SharedLog>>,
    closed: bool,
}

impl Transport for ScriptedTransport {
    fn exec(&mut self, command: &str, _timeout: Duration) -> Result<CommandOutput, SessionError> {
        self.log.lock().unwrap().exec_log.push(command.to_string());
        match self.responses.pop_front() {
            Some(ScriptedResponse::Output(out)) => Ok(out),
            Some(ScriptedResponse::Error(err)) => Err(err),
            None => Ok(CommandOutput::default()),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().close_count += 1;
        }
    }
}
