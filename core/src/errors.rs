//! Unified error types for the procHub core crate.
//!
//! Each consumer maps these core errors to its own transport errors
//! (agent → JSON-RPC error response). Remote command failures such as a
//! non-zero exit status are *not* errors — they are returned as data in
//! [`crate::session::transport::CommandOutput`].

use std::time::Duration;

use thiserror::Error;

/// Top-level error type encompassing all core error categories.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A session-related error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A trust-store persistence error.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A remote process-manager error.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// A configuration error (invalid values, missing fields, parse failures).
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that don't fit other categories.
    #[error("{0}")]
    Other(String),
}

/// Errors related to the SSH session lifecycle and command execution.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The TCP connection or SSH handshake failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The server rejected the offered credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The host key did not pass verification and awaits a user decision.
    #[error("Host key verification required for {host}:{port}")]
    HostKeyRejected {
        host: String,
        port: u16,
        /// True when a previously pinned key changed (possible MITM),
        /// false for a first contact with an unknown host.
        changed: bool,
    },

    /// No live session; the operation requires a connected state.
    #[error("Not connected")]
    NotConnected,

    /// The command did not complete within the allotted time.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The transport channel died mid-operation; the session was torn down.
    #[error("Transport channel failed: {0}")]
    ChannelFatal(String),

    /// A low-level I/O error during session operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors writing or serializing the persisted trust store.
///
/// These must never take a live session down; callers log them and skip
/// persistence.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Reading or writing the store file failed.
    #[error("Trust store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The store document could not be serialized.
    #[error("Trust store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from the remote process controller.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// PM2 is not installed on the remote host.
    #[error("PM2 is not installed on the remote host")]
    ManagerNotInstalled,

    /// No listing format could be parsed from the remote output.
    #[error("Unparseable process listing: {0}")]
    Unparseable(String),

    /// The underlying session operation failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}
