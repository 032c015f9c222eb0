//! Connector and transport traits for the managed session.
//!
//! The session manager talks to the remote host exclusively through
//! these traits. The production implementation lives in
//! [`super::ssh`]; tests inject scripted implementations from
//! [`super::testing`].
//!
//! The traits are synchronous on purpose: libssh2 is a blocking
//! library, and the session manager bridges calls onto the runtime
//! with `spawn_blocking`.

use std::time::Duration;

use serde::Serialize;

use crate::config::SshConfig;
use crate::errors::SessionError;

/// Captured output of one remote command.
///
/// A non-zero exit status or stderr content is data, not an error.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// The host key observed during the SSH handshake, before
/// authentication.
#[derive(Debug, Clone)]
pub struct HostKey {
    /// SSH algorithm name, e.g. `ssh-ed25519`.
    pub key_type: String,
    /// The raw key blob as sent by the server.
    pub key_bytes: Vec<u8>,
}

/// Opens new sessions to a remote host.
pub trait Connector: Send + Sync {
    /// Establish the TCP connection and SSH handshake, stopping before
    /// authentication so the host key can be verified first.
    fn open(&self, config: &SshConfig) -> Result<Box<dyn HandshakeSession>, SessionError>;
}

/// A session that has completed the handshake but not yet
/// authenticated. Dropping it abandons the connection, which is how a
/// rejected host key is handled.
pub trait HandshakeSession: Send {
    /// The host key the server presented.
    fn host_key(&self) -> &HostKey;

    /// Authenticate with the credentials in `config` and return the
    /// live transport.
    fn authenticate(self: Box<Self>, config: &SshConfig)
        -> Result<Box<dyn Transport>, SessionError>;
}

/// A live, authenticated session.
pub trait Transport: Send {
    /// Run a command and collect its output, enforcing `timeout` as a
    /// hard deadline. Overrun yields [`SessionError::Timeout`] and the
    /// command is abandoned; whether it completed remotely is unknown.
    fn exec(&mut self, command: &str, timeout: Duration)
        -> Result<CommandOutput, SessionError>;

    /// Close the session. Best effort; errors are swallowed.
    fn close(&mut self);
}
