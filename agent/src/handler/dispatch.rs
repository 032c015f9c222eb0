use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use prochub_core::errors::{ProcessError, SessionError};
use prochub_core::process::RemoteProcessController;
use prochub_core::session::{CommandExecutor, SessionManager};
use prochub_core::trust::TrustStore;

use crate::protocol::errors;
use crate::protocol::messages::{JsonRpcErrorResponse, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::methods::{
    Capabilities, ExecRunParams, HealthCheckResult, HostKeyDeleteParams, HostKeySaveParams,
    InitializeParams, InitializeResult, ProcessActionParams, ProcessListResult,
    ProcessLogsParams, ProcessLogsResult, SessionConnectParams, SessionConnectResult,
    SessionStatusResult, SessionTestResult,
};

/// The agent's protocol version.
const AGENT_PROTOCOL_VERSION: &str = "0.1.0";

/// Dispatcher handles incoming JSON-RPC requests and routes them
/// to the appropriate handler function.
pub struct Dispatcher {
    session: Arc<SessionManager>,
    executor: Arc<CommandExecutor>,
    processes: Arc<RemoteProcessController>,
    trust: Arc<TrustStore>,
    initialized: bool,
    start_time: Instant,
}

/// The result of dispatching a request: either a success or error response.
pub enum DispatchResult {
    Success(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl DispatchResult {
    /// Serialize the result to a JSON `Value`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Success(resp) => serde_json::to_value(resp).unwrap_or(Value::Null),
            Self::Error(resp) => serde_json::to_value(resp).unwrap_or(Value::Null),
        }
    }

    fn success(id: Value, result: impl serde::Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::Success(JsonRpcResponse::new(id, value)),
            Err(e) => Self::Error(JsonRpcErrorResponse::new(
                id,
                errors::INTERNAL_ERROR,
                format!("Failed to serialize result: {e}"),
            )),
        }
    }
}

impl Dispatcher {
    pub fn new(
        session: Arc<SessionManager>,
        executor: Arc<CommandExecutor>,
        processes: Arc<RemoteProcessController>,
        trust: Arc<TrustStore>,
    ) -> Self {
        Self {
            session,
            executor,
            processes,
            trust,
            initialized: false,
            start_time: Instant::now(),
        }
    }

    /// Dispatch a parsed JSON-RPC request to the appropriate handler.
    pub async fn dispatch(&mut self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();
        let method = request.method.as_str();

        debug!("Dispatching method: {}", method);

        // The `initialize` method is always allowed
        if method == "initialize" {
            return self.handle_initialize(request);
        }

        // All other methods require initialization
        if !self.initialized {
            return DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::NOT_INITIALIZED,
                "Agent not initialized — call 'initialize' first",
            ));
        }

        match method {
            "session.connect" => self.handle_session_connect(request).await,
            "session.disconnect" => self.handle_session_disconnect(request).await,
            "session.status" => self.handle_session_status(request).await,
            "session.test" => self.handle_session_test(request).await,
            "session.accept_host_key" => self.handle_accept_host_key(request).await,
            "session.reject_host_key" => self.handle_reject_host_key(request).await,
            "exec.run" => self.handle_exec_run(request).await,
            "process.list" => self.handle_process_list(request).await,
            "process.start" => self.handle_process_action(request, "start").await,
            "process.stop" => self.handle_process_action(request, "stop").await,
            "process.restart" => self.handle_process_action(request, "restart").await,
            "process.delete" => self.handle_process_action(request, "delete").await,
            "process.logs" => self.handle_process_logs(request).await,
            "system.stats" => self.handle_system_stats(request).await,
            "hostkey.list" => self.handle_hostkey_list(request),
            "hostkey.save" => self.handle_hostkey_save(request),
            "hostkey.delete" => self.handle_hostkey_delete(request),
            "health.check" => self.handle_health_check(request).await,
            _ => {
                warn!("Unknown method: {}", method);
                DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
            }
        }
    }

    fn handle_initialize(&mut self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: InitializeParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid initialize params: {e}"),
                ));
            }
        };

        // Version negotiation: we only support major version 0
        let requested: Vec<&str> = params.protocol_version.split('.').collect();
        let major = requested.first().and_then(|s| s.parse::<u32>().ok());

        if major != Some(0) {
            return DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::VERSION_NOT_SUPPORTED,
                format!(
                    "Unsupported protocol version: {} (agent supports 0.x)",
                    params.protocol_version
                ),
            ));
        }

        self.initialized = true;

        DispatchResult::success(
            id,
            InitializeResult {
                protocol_version: AGENT_PROTOCOL_VERSION.to_string(),
                agent_version: env!("CARGO_PKG_VERSION").to_string(),
                capabilities: Capabilities {
                    process_manager: "pm2".to_string(),
                    notifications: vec![
                        "session.state".to_string(),
                        "session.host_key".to_string(),
                    ],
                },
            },
        )
    }

    async fn handle_session_connect(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: SessionConnectParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid session.connect params: {e}"),
                ));
            }
        };

        match self.session.connect(params.config).await {
            Ok(state) => DispatchResult::success(
                id,
                SessionConnectResult {
                    connected: true,
                    state,
                },
            ),
            Err(SessionError::HostKeyRejected {
                host,
                port,
                changed,
            }) => {
                // Attach the pending fingerprint so the client can show
                // it for the user decision.
                let fingerprint = self
                    .session
                    .pending_fingerprint()
                    .await
                    .and_then(|p| serde_json::to_value(p.fingerprint).ok())
                    .unwrap_or(Value::Null);
                DispatchResult::Error(
                    JsonRpcErrorResponse::new(
                        id,
                        errors::HOST_KEY_REJECTED,
                        format!("Host key verification required for {host}:{port}"),
                    )
                    .with_data(json!({
                        "host": host,
                        "port": port,
                        "changed": changed,
                        "fingerprint": fingerprint,
                    })),
                )
            }
            Err(e) => session_error_response(id, &e),
        }
    }

    async fn handle_session_disconnect(&self, request: JsonRpcRequest) -> DispatchResult {
        let state = self.session.disconnect().await;
        DispatchResult::success(request.id, json!({ "state": state }))
    }

    async fn handle_session_status(&self, request: JsonRpcRequest) -> DispatchResult {
        let alive = self.session.verify_active().await;
        DispatchResult::success(
            request.id,
            SessionStatusResult {
                state: self.session.status().await,
                pending_host_key: self.session.pending_fingerprint().await,
                alive,
            },
        )
    }

    async fn handle_session_test(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: SessionConnectParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid session.test params: {e}"),
                ));
            }
        };

        match self.session.test_connection(params.config).await {
            Ok(manager_installed) => DispatchResult::success(
                id,
                SessionTestResult {
                    success: true,
                    manager_installed,
                },
            ),
            Err(e) => session_error_response(id, &e),
        }
    }

    async fn handle_accept_host_key(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();
        match self.session.accept_pending_fingerprint().await {
            Ok(Some(record)) => {
                DispatchResult::success(id, json!({ "accepted": true, "fingerprint": record }))
            }
            Ok(None) => DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::INVALID_REQUEST,
                "No host key awaiting a decision",
            )),
            Err(e) => DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::PERSISTENCE_ERROR,
                format!("Failed to persist host key: {e}"),
            )),
        }
    }

    async fn handle_reject_host_key(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();
        match self.session.reject_pending_fingerprint().await {
            Some(fingerprint) => {
                DispatchResult::success(id, json!({ "rejected": true, "fingerprint": fingerprint }))
            }
            None => DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::INVALID_REQUEST,
                "No host key awaiting a decision",
            )),
        }
    }

    async fn handle_exec_run(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: ExecRunParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid exec.run params: {e}"),
                ));
            }
        };

        let timeout = params.timeout_secs.map(Duration::from_secs);
        match self.executor.execute(&params.command, timeout).await {
            Ok(output) => DispatchResult::success(id, output),
            Err(e) => session_error_response(id, &e),
        }
    }

    async fn handle_process_list(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();
        match self.processes.list().await {
            Ok(processes) => DispatchResult::success(
                id,
                ProcessListResult {
                    success: true,
                    manager_installed: true,
                    processes,
                },
            ),
            // A host without PM2 is an answer, not a failure.
            Err(ProcessError::ManagerNotInstalled) => DispatchResult::success(
                id,
                ProcessListResult {
                    success: false,
                    manager_installed: false,
                    processes: Vec::new(),
                },
            ),
            Err(e) => process_error_response(id, &e),
        }
    }

    async fn handle_process_action(
        &self,
        request: JsonRpcRequest,
        verb: &'static str,
    ) -> DispatchResult {
        let id = request.id.clone();

        let params: ProcessActionParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid process.{verb} params: {e}"),
                ));
            }
        };

        let result = match verb {
            "start" => self.processes.start(&params.name).await,
            "stop" => self.processes.stop(&params.name).await,
            "restart" => self.processes.restart(&params.name).await,
            _ => self.processes.delete(&params.name).await,
        };

        match result {
            Ok(outcome) => DispatchResult::success(id, outcome),
            Err(e) => process_error_response(id, &e),
        }
    }

    async fn handle_process_logs(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: ProcessLogsParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid process.logs params: {e}"),
                ));
            }
        };

        match self.processes.logs(&params.name, params.lines).await {
            Ok(lines) => DispatchResult::success(
                id,
                ProcessLogsResult {
                    name: params.name,
                    lines,
                },
            ),
            Err(e) => process_error_response(id, &e),
        }
    }

    async fn handle_system_stats(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();
        match self.processes.system_stats().await {
            Ok(stats) => DispatchResult::success(id, stats),
            Err(e) => process_error_response(id, &e),
        }
    }

    fn handle_hostkey_list(&self, request: JsonRpcRequest) -> DispatchResult {
        DispatchResult::success(request.id, json!({ "hosts": self.trust.list() }))
    }

    fn handle_hostkey_save(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: HostKeySaveParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid hostkey.save params: {e}"),
                ));
            }
        };

        // An explicitly saved key counts as a user decision.
        let mut record = params.fingerprint;
        record.verified = true;
        match self.trust.put(record.clone()) {
            Ok(()) => DispatchResult::success(id, json!({ "saved": true, "fingerprint": record })),
            Err(e) => DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::PERSISTENCE_ERROR,
                format!("Failed to update trust store: {e}"),
            )),
        }
    }

    fn handle_hostkey_delete(&self, request: JsonRpcRequest) -> DispatchResult {
        let id = request.id.clone();

        let params: HostKeyDeleteParams = match serde_json::from_value(request.params) {
            Ok(p) => p,
            Err(e) => {
                return DispatchResult::Error(JsonRpcErrorResponse::new(
                    id,
                    errors::INVALID_PARAMS,
                    format!("Invalid hostkey.delete params: {e}"),
                ));
            }
        };

        match self.trust.delete(&params.host, params.port) {
            Ok(deleted) => DispatchResult::success(id, json!({ "deleted": deleted })),
            Err(e) => DispatchResult::Error(JsonRpcErrorResponse::new(
                id,
                errors::PERSISTENCE_ERROR,
                format!("Failed to update trust store: {e}"),
            )),
        }
    }

    async fn handle_health_check(&self, request: JsonRpcRequest) -> DispatchResult {
        DispatchResult::success(
            request.id,
            HealthCheckResult {
                status: "ok".to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                connected: self.session.status().await.connected,
            },
        )
    }
}

/// Map a core session error to the wire error response.
fn session_error_response(id: Value, error: &SessionError) -> DispatchResult {
    let code = match error {
        SessionError::ConnectFailed(_) => errors::CONNECT_FAILED,
        SessionError::AuthenticationFailed(_) => errors::AUTH_FAILED,
        SessionError::HostKeyRejected { .. } => errors::HOST_KEY_REJECTED,
        SessionError::NotConnected => errors::NOT_CONNECTED,
        SessionError::Timeout(_) => errors::TIMEOUT,
        SessionError::ChannelFatal(_) => errors::CHANNEL_FATAL,
        SessionError::Io(_) => errors::INTERNAL_ERROR,
    };
    DispatchResult::Error(JsonRpcErrorResponse::new(id, code, error.to_string()))
}

fn process_error_response(id: Value, error: &ProcessError) -> DispatchResult {
    match error {
        ProcessError::ManagerNotInstalled => DispatchResult::Error(JsonRpcErrorResponse::new(
            id,
            errors::MANAGER_NOT_INSTALLED,
            error.to_string(),
        )),
        ProcessError::Unparseable(_) => DispatchResult::Error(JsonRpcErrorResponse::new(
            id,
            errors::INTERNAL_ERROR,
            error.to_string(),
        )),
        ProcessError::Session(e) => session_error_response(id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prochub_core::notify::Notifier;
    use prochub_core::session::testing::{output, ScriptedConnector, ScriptedSession};
    use serde_json::json;
    use tempfile::TempDir;

    fn make_dispatcher(tmp: &TempDir, connector: Arc<ScriptedConnector>) -> Dispatcher {
        let trust = Arc::new(TrustStore::open(tmp.path().join("known_hosts.json")));
        let session = Arc::new(SessionManager::new(
            connector,
            trust.clone(),
            Arc::new(Notifier::new()),
        ));
        let executor = Arc::new(CommandExecutor::new(session.clone()));
        let processes = Arc::new(RemoteProcessController::new(executor.clone()));
        Dispatcher::new(session, executor, processes, trust)
    }

    fn make_request(method: &str, params: Value, id: u64) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: json!(id),
        }
    }

    fn init_params() -> Value {
        json!({
            "protocol_version": "0.1.0",
            "client": "test",
            "client_version": "0.1.0"
        })
    }

    fn connect_params(allow_unverified: bool) -> Value {
        json!({
            "config": {
                "host": "pi.local",
                "username": "pi",
                "authMethod": "password",
                "password": "raspberry",
                "allowUnverifiedHostKeys": allow_unverified
            }
        })
    }

    async fn init_dispatcher(d: &mut Dispatcher) {
        let req = make_request("initialize", init_params(), 1);
        let result = d.dispatch(req).await;
        assert!(matches!(result, DispatchResult::Success(_)));
    }

    // ── Initialize tests ────────────────────────────────────────────

    #[tokio::test]
    async fn initialize_succeeds() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        let req = make_request("initialize", init_params(), 1);
        let result = d.dispatch(req).await;

        let json = result.to_json();
        assert_eq!(json["result"]["protocol_version"], "0.1.0");
        assert_eq!(json["result"]["capabilities"]["process_manager"], "pm2");
        assert!(json["result"]["capabilities"]["notifications"]
            .as_array()
            .unwrap()
            .contains(&json!("session.state")));
    }

    #[tokio::test]
    async fn initialize_rejects_incompatible_version() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        let req = make_request(
            "initialize",
            json!({
                "protocol_version": "1.0.0",
                "client": "test",
                "client_version": "1.0.0"
            }),
            1,
        );
        let result = d.dispatch(req).await;
        let json = result.to_json();
        assert_eq!(json["error"]["code"], errors::VERSION_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn initialize_rejects_invalid_params() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        let req = make_request("initialize", json!({}), 1);
        let result = d.dispatch(req).await;
        let json = result.to_json();
        assert_eq!(json["error"]["code"], errors::INVALID_PARAMS);
    }

    // ── Not-initialized gate ────────────────────────────────────────

    #[tokio::test]
    async fn methods_require_initialization() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));

        for method in &[
            "session.connect",
            "session.status",
            "exec.run",
            "process.list",
            "hostkey.list",
            "health.check",
        ] {
            let req = make_request(method, json!({}), 1);
            let result = d.dispatch(req).await;
            let json = result.to_json();
            assert_eq!(
                json["error"]["code"], errors::NOT_INITIALIZED,
                "{method} should require initialization"
            );
        }
    }

    // ── Session connect tests ───────────────────────────────────────

    #[tokio::test]
    async fn session_connect_success() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new());
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        let result = d.dispatch(req).await;
        let json = result.to_json();
        assert_eq!(json["result"]["connected"], true);
        assert_eq!(json["result"]["state"]["host"], "pi.local");
        assert_eq!(json["result"]["state"]["username"], "pi");
    }

    #[tokio::test]
    async fn session_connect_unknown_key_carries_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new());
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(false), 2);
        let result = d.dispatch(req).await;
        let json = result.to_json();
        assert_eq!(json["error"]["code"], errors::HOST_KEY_REJECTED);
        assert_eq!(json["error"]["data"]["changed"], false);
        assert_eq!(json["error"]["data"]["host"], "pi.local");
        assert!(json["error"]["data"]["fingerprint"]["hash"]
            .as_str()
            .unwrap()
            .starts_with("SHA256:"));
    }

    #[tokio::test]
    async fn accept_host_key_then_reconnect() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new());
        connector.push_session(ScriptedSession::new());
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        // First attempt is refused and parks the fingerprint.
        let req = make_request("session.connect", connect_params(false), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["error"]["code"], errors::HOST_KEY_REJECTED);

        // Accept, then reconnect against the now-pinned key.
        let req = make_request("session.accept_host_key", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["accepted"], true);
        assert_eq!(result["result"]["fingerprint"]["verified"], true);

        let req = make_request("session.connect", connect_params(false), 4);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["connected"], true);
    }

    #[tokio::test]
    async fn accept_host_key_without_pending_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        init_dispatcher(&mut d).await;

        let req = make_request("session.accept_host_key", json!({}), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["error"]["code"], errors::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn reject_host_key_clears_pending() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new());
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(false), 2);
        d.dispatch(req).await;

        let req = make_request("session.reject_host_key", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["rejected"], true);

        // The store stayed empty.
        let req = make_request("hostkey.list", json!({}), 4);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["hosts"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn session_status_reports_pending_and_alive() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new());
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(false), 2);
        d.dispatch(req).await;

        let req = make_request("session.status", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["state"]["connected"], false);
        assert_eq!(result["result"]["alive"], false);
        assert_eq!(result["result"]["pending_host_key"]["changed"], false);
    }

    #[tokio::test]
    async fn session_test_probes_without_touching_state() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new().with_output(output("/usr/bin/pm2\n", "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.test", connect_params(true), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["success"], true);
        assert_eq!(result["result"]["manager_installed"], true);

        // The probe session never becomes the managed session.
        let req = make_request("session.status", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["state"]["connected"], false);
    }

    // ── Exec tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn exec_run_returns_command_output() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new().with_output(output("Linux pi 6.6\n", "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("exec.run", json!({"command": "uname -a"}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["stdout"], "Linux pi 6.6\n");
        assert_eq!(result["result"]["exitCode"], 0);
    }

    #[tokio::test]
    async fn exec_run_without_session_fails() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        init_dispatcher(&mut d).await;

        let req = make_request("exec.run", json!({"command": "uptime"}), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["error"]["code"], errors::NOT_CONNECTED);
    }

    // ── Process tests ───────────────────────────────────────────────

    const JLIST_SAMPLE: &str = r#"[
        {
            "pid": 4242,
            "name": "api-server",
            "pm_id": 0,
            "monit": { "memory": 52428800, "cpu": 2.5 },
            "pm2_env": { "status": "online", "restart_time": 3, "pm_uptime": 1700000000000 }
        }
    ]"#;

    #[tokio::test]
    async fn process_list_success() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new()
                .with_output(output("/usr/bin/pm2\n", "", 0))
                .with_output(output(JLIST_SAMPLE, "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("process.list", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["success"], true);
        assert_eq!(result["result"]["manager_installed"], true);
        let processes = result["result"]["processes"].as_array().unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0]["name"], "api-server");
        assert_eq!(processes[0]["status"], "online");
    }

    #[tokio::test]
    async fn process_list_without_pm2_is_a_soft_failure() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new().with_output(output("", "", 1)));
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("process.list", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert!(result.get("error").is_none());
        assert_eq!(result["result"]["success"], false);
        assert_eq!(result["result"]["manager_installed"], false);
        assert_eq!(result["result"]["processes"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn process_restart_quotes_the_name() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new().with_output(output("[PM2] restarted\n", "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector.clone());
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("process.restart", json!({"name": "api server"}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["success"], true);
        assert_eq!(connector.exec_log(), vec!["pm2 restart 'api server'"]);
    }

    #[tokio::test]
    async fn process_logs_uses_default_line_count() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new().with_output(output("log line\n", "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector.clone());
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("process.logs", json!({"name": "api"}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["lines"][0], "log line");
        assert_eq!(
            connector.exec_log(),
            vec!["pm2 logs 'api' --lines 100 --nostream"]
        );
    }

    #[tokio::test]
    async fn system_stats_reports_memory() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new().with_output(output("Mem: 2048 1024 1024\n", "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("system.stats", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["memTotalMb"], 2048);
        assert_eq!(result["result"]["memFreeMb"], 1024);
    }

    // ── Host key store tests ────────────────────────────────────────

    #[tokio::test]
    async fn hostkey_list_and_delete() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(ScriptedSession::new());
        let mut d = make_dispatcher(&tmp, connector);
        init_dispatcher(&mut d).await;

        // Pin a key by connecting with auto-accept.
        let req = make_request("session.connect", connect_params(true), 2);
        d.dispatch(req).await;

        let req = make_request("hostkey.list", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        let hosts = result["result"]["hosts"].as_array().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0]["host"], "pi.local");

        let req = make_request("hostkey.delete", json!({"host": "pi.local"}), 4);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["deleted"], true);

        // Deleting again reports absence.
        let req = make_request("hostkey.delete", json!({"host": "pi.local"}), 5);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["deleted"], false);
    }

    #[tokio::test]
    async fn hostkey_save_pins_as_verified() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        init_dispatcher(&mut d).await;

        let req = make_request(
            "hostkey.save",
            json!({
                "fingerprint": {
                    "host": "pi.local",
                    "port": 22,
                    "hash": "SHA256:abc",
                    "hash_algorithm": "sha256",
                    "key_type": "ssh-ed25519",
                    "verified": false,
                    "added_at": "2026-08-20T10:00:00Z",
                    "last_seen": "2026-08-20T10:00:00Z"
                }
            }),
            2,
        );
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["saved"], true);
        assert_eq!(result["result"]["fingerprint"]["verified"], true);

        let req = make_request("hostkey.list", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["hosts"][0]["hash"], "SHA256:abc");
    }

    // ── Health check tests ──────────────────────────────────────────

    #[tokio::test]
    async fn health_check() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        init_dispatcher(&mut d).await;

        let req = make_request("health.check", json!({}), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["status"], "ok");
        assert!(result["result"]["uptime_secs"].is_number());
        assert_eq!(result["result"]["connected"], false);
    }

    // ── Unknown method ──────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_method() {
        let tmp = TempDir::new().unwrap();
        let mut d = make_dispatcher(&tmp, Arc::new(ScriptedConnector::new()));
        init_dispatcher(&mut d).await;

        let req = make_request("unknown.method", json!({}), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["error"]["code"], errors::METHOD_NOT_FOUND);
    }

    // ── Full protocol flow integration test ─────────────────────────

    #[tokio::test]
    async fn full_protocol_flow() {
        let tmp = TempDir::new().unwrap();
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_session(
            ScriptedSession::new()
                .with_output(output("/usr/bin/pm2\n", "", 0))
                .with_output(output(JLIST_SAMPLE, "", 0))
                .with_output(output("[PM2] stopped\n", "", 0)),
        );
        let mut d = make_dispatcher(&tmp, connector);

        // 1. Initialize
        let req = make_request("initialize", init_params(), 1);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["protocol_version"], "0.1.0");

        // 2. Connect (first contact, auto-accept)
        let req = make_request("session.connect", connect_params(true), 2);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["connected"], true);

        // 3. Health check sees the live session
        let req = make_request("health.check", json!({}), 3);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["connected"], true);

        // 4. List processes
        let req = make_request("process.list", json!({}), 4);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["processes"][0]["name"], "api-server");

        // 5. Stop one
        let req = make_request("process.stop", json!({"name": "api-server"}), 5);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["success"], true);

        // 6. Disconnect
        let req = make_request("session.disconnect", json!({}), 6);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["state"]["connected"], false);

        // 7. Status confirms the teardown
        let req = make_request("session.status", json!({}), 7);
        let result = d.dispatch(req).await.to_json();
        assert_eq!(result["result"]["state"]["connected"], false);
        assert_eq!(result["result"]["alive"], false);
    }
}
