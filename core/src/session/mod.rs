//! The managed SSH session: connector/transport seam, the real `ssh2`
//! implementation, the session manager, and the command executor.

pub mod executor;
pub mod manager;
pub mod ssh;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use executor::CommandExecutor;
pub use manager::{ConnectionState, PendingFingerprint, SessionManager};
pub use transport::{CommandOutput, Connector, HandshakeSession, HostKey, Transport};
