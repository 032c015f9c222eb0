//! Standard and application JSON-RPC 2.0 error codes.

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist / is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i64 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

// Application error codes (procHub-specific).

/// Authentication against the remote host failed.
pub const AUTH_FAILED: i64 = -32001;

/// The host key is unknown or changed and awaits a user decision.
pub const HOST_KEY_REJECTED: i64 = -32002;

/// No live SSH session; call `session.connect` first.
pub const NOT_CONNECTED: i64 = -32003;

/// The remote command did not finish within its timeout.
pub const TIMEOUT: i64 = -32004;

/// The transport channel died; the session was torn down.
pub const CHANNEL_FATAL: i64 = -32005;

/// The trust store could not be read or written.
pub const PERSISTENCE_ERROR: i64 = -32006;

/// PM2 is not installed on the remote host.
pub const MANAGER_NOT_INSTALLED: i64 = -32007;

/// The TCP connection or SSH handshake failed.
pub const CONNECT_FAILED: i64 = -32008;

/// Protocol version mismatch.
pub const VERSION_NOT_SUPPORTED: i64 = -32009;

/// The agent has not been initialized yet (must call `initialize` first).
pub const NOT_INITIALIZED: i64 = -32010;
