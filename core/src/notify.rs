//! Connection-state notifier.
//!
//! The session manager publishes [`SessionEvent`]s through this fan-out;
//! any number of subscribers receive them over unbounded channels.
//! Dropping a receiver unsubscribes it. Events are emitted only on real
//! transitions and arrive in causal order per subscriber.

use std::sync::Mutex;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::trust::HostFingerprint;

/// Events published by the session manager.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connected flag flipped.
    ConnectionChanged { connected: bool },
    /// A host key needs a user decision before connecting can proceed.
    HostKeyVerificationNeeded {
        fingerprint: HostFingerprint,
        /// True when a pinned key changed, false for first contact.
        changed: bool,
    },
}

/// Fan-out of session events to any number of subscribers.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<UnboundedSender<SessionEvent>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver an event to all live subscribers, pruning closed ones.
    pub fn emit(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            "Emitted session event to {} subscriber(s): {:?}",
            subscribers.len(),
            event
        );
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|s| s.len())
            .unwrap_or(0)
    }
}
