use std::sync::Arc;

use serde_json::json;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use prochub_core::notify::SessionEvent;
use prochub_core::process::RemoteProcessController;
use prochub_core::session::ssh::SshConnector;
use prochub_core::session::{CommandExecutor, SessionManager};
use prochub_core::trust::TrustStore;

use crate::handler::dispatch::Dispatcher;
use crate::io::transport::{run_transport_loop, NotificationSender};
use crate::protocol::messages::JsonRpcNotification;

/// Run the NDJSON stdio transport loop.
///
/// Reads JSON-RPC messages from stdin (one per line) and writes
/// responses to stdout. Logs go to stderr. Session events are forwarded
/// to the client as JSON-RPC notifications interleaved with responses.
pub async fn run_stdio_loop() -> anyhow::Result<()> {
    let trust = Arc::new(TrustStore::open_default());
    let notifier = Arc::new(prochub_core::notify::Notifier::new());
    let session = Arc::new(SessionManager::new(
        Arc::new(SshConnector),
        trust.clone(),
        notifier,
    ));
    let executor = Arc::new(CommandExecutor::new(session.clone()));
    let processes = Arc::new(RemoteProcessController::new(executor.clone()));
    let mut dispatcher = Dispatcher::new(session.clone(), executor, processes, trust);

    let (notification_tx, mut notification_rx) = tokio::sync::mpsc::unbounded_channel();
    let events = session.subscribe();
    let forwarder = tokio::spawn(forward_session_events(events, notification_tx));

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let shutdown = CancellationToken::new();

    info!("Stdio transport loop started, waiting for input");
    let result = run_transport_loop(
        &mut reader,
        &mut stdout,
        &mut dispatcher,
        &mut notification_rx,
        shutdown,
    )
    .await;

    forwarder.abort();
    result
}

/// Translate core session events into wire notifications.
async fn forward_session_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    tx: NotificationSender,
) {
    while let Some(event) = events.recv().await {
        let notification = match event {
            SessionEvent::ConnectionChanged { connected } => {
                JsonRpcNotification::new("session.state", json!({ "connected": connected }))
            }
            SessionEvent::HostKeyVerificationNeeded {
                fingerprint,
                changed,
            } => JsonRpcNotification::new(
                "session.host_key",
                json!({ "fingerprint": fingerprint, "changed": changed }),
            ),
        };
        if tx.send(notification).is_err() {
            break;
        }
    }
}
