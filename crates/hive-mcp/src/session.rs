//! A session with one tool server.
//!
//! The session owns its transport through a worker task that multiplexes
//! outbound frames and inbound frames. Callers talk to the worker through a
//! channel and wait for their response on a per-request oneshot, so any
//! number of tool calls can be in flight at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hive_core::config::LimitsConfig;
use hive_core::ToolDescriptor;

use crate::error::{McpError, ToolCallError};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, CancelledParams, IncomingMessage, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsParams, ListToolsResult, RequestId, ServerInfo, PROTOCOL_VERSION,
};
use crate::transport::Transport;

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_TOOL_PAGES: usize = 100;

const OUTBOUND_CAPACITY: usize = 64;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
    /// Terminal; the transport is gone
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Timeouts applied by a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Deadline for one `tools/call`
    pub call_timeout: Duration,
    /// Deadline for each handshake request
    pub handshake_timeout: Duration,
    /// How long `close` waits for in-flight calls
    pub drain_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&LimitsConfig> for SessionOptions {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(limits.tool_call_timeout_secs),
            drain_timeout: Duration::from_secs(limits.shutdown_timeout_secs),
            ..Self::default()
        }
    }
}

type Reply = Result<Value, JsonRpcError>;

/// Requests awaiting a response, keyed by correlation id.
#[derive(Default)]
struct PendingCalls {
    slots: Mutex<HashMap<i64, oneshot::Sender<Reply>>>,
    idle: Notify,
}

impl PendingCalls {
    fn insert(&self, id: i64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);
        rx
    }

    /// Deliver a response. Returns false if nobody is waiting for `id`.
    fn complete(&self, id: i64, reply: Reply) -> bool {
        let slot = self.slots.lock().remove(&id);
        let delivered = match slot {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        };
        self.notify_if_idle();
        delivered
    }

    /// Forget a request. Returns true if it was still waiting.
    fn release(&self, id: i64) -> bool {
        let removed = self.slots.lock().remove(&id).is_some();
        self.notify_if_idle();
        removed
    }

    /// Drop every slot; waiters see the transport as closed.
    fn fail_all(&self) {
        self.slots.lock().clear();
        self.idle.notify_waiters();
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }

    fn notify_if_idle(&self) {
        if self.slots.lock().is_empty() {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.slots.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// State shared between the session handle and its worker.
struct Shared {
    name: String,
    state: RwLock<SessionState>,
    pending: PendingCalls,
    outbound: mpsc::Sender<String>,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        debug!(server = %self.name, from = %previous, to = %next, "Session state change");
    }

    fn transport_lost(&self, reason: &str) {
        let mut state = self.state.write();
        if matches!(*state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        error!(server = %self.name, reason = reason, "Lost connection to tool server");
        *state = SessionState::Failed;
    }

    /// Handle one inbound frame, returning a frame to send back if needed.
    fn handle_frame(&self, frame: &str) -> Option<String> {
        let message = match IncomingMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %self.name, error = %e, "Ignoring unrecognised frame");
                return None;
            }
        };

        match message {
            IncomingMessage::Response { id, outcome } => {
                let delivered = id
                    .as_number()
                    .map(|n| self.pending.complete(n, outcome))
                    .unwrap_or(false);
                if !delivered {
                    debug!(server = %self.name, id = ?id, "Response for unknown or abandoned request");
                }
                None
            }
            IncomingMessage::Request { id, method, .. } => {
                let response = if method == methods::PING {
                    JsonRpcResponse::success(id, serde_json::json!({}))
                } else {
                    debug!(server = %self.name, method = %method, "Rejecting server request");
                    JsonRpcResponse::failure(id, JsonRpcError::method_not_found(&method))
                };
                serde_json::to_string(&response).ok()
            }
            IncomingMessage::Notification { method, .. } => {
                debug!(server = %self.name, method = %method, "Server notification");
                None
            }
        }
    }
}

enum WorkerEvent {
    Shutdown,
    Outbound(Option<String>),
    Inbound(Result<Option<String>, crate::error::TransportError>),
}

async fn run_worker(
    shared: Arc<Shared>,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => WorkerEvent::Shutdown,
            frame = outbound.recv() => WorkerEvent::Outbound(frame),
            inbound = transport.receive() => WorkerEvent::Inbound(inbound),
        };

        match event {
            WorkerEvent::Shutdown | WorkerEvent::Outbound(None) => break,
            WorkerEvent::Outbound(Some(frame)) => {
                if let Err(e) = transport.send(&frame).await {
                    shared.transport_lost(&e.to_string());
                    break;
                }
            }
            WorkerEvent::Inbound(Ok(Some(frame))) => {
                if let Some(reply) = shared.handle_frame(&frame) {
                    if let Err(e) = transport.send(&reply).await {
                        shared.transport_lost(&e.to_string());
                        break;
                    }
                }
            }
            WorkerEvent::Inbound(Ok(None)) => {
                shared.transport_lost("server closed the connection");
                break;
            }
            WorkerEvent::Inbound(Err(e)) => {
                shared.transport_lost(&e.to_string());
                break;
            }
        }
    }

    // Refuse new frames before failing what is left, so no request can slip in between.
    outbound.close();
    shared.pending.fail_all();
    if let Err(e) = transport.close().await {
        warn!(server = %shared.name, error = %e, "Error closing transport");
    }
}

/// Releases a pending slot when a request future is dropped before its answer arrives.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.shared.pending.release(self.id) {
            return;
        }
        let params = CancelledParams {
            request_id: RequestId::Number(self.id),
            reason: Some("request abandoned by client".to_string()),
        };
        let notification =
            JsonRpcNotification::new(methods::CANCELLED, serde_json::to_value(params).ok());
        if let Ok(frame) = serde_json::to_string(&notification) {
            if self.shared.outbound.try_send(frame).is_err() {
                debug!(server = %self.shared.name, id = self.id, "Could not send cancellation");
            }
        }
    }
}

/// Session with one tool server.
pub struct ServerSession {
    shared: Arc<Shared>,
    options: SessionOptions,
    next_id: AtomicI64,
    transport: Mutex<Option<Box<dyn Transport>>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    tools: RwLock<Vec<ToolDescriptor>>,
    server_info: RwLock<Option<ServerInfo>>,
}

impl ServerSession {
    /// Create a disconnected session around an unopened transport.
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: RwLock::new(SessionState::Disconnected),
                pending: PendingCalls::default(),
                outbound: tx,
            }),
            options,
            next_id: AtomicI64::new(1),
            transport: Mutex::new(Some(transport)),
            outbound_rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
            tools: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Tools discovered during the handshake.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }

    /// Open the transport, run the handshake and discover tools.
    ///
    /// The session is `Ready` only once the tool list has arrived. Any failure
    /// before that leaves it `Failed` with the transport released.
    pub async fn connect(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        {
            let mut state = self.shared.state.write();
            if *state != SessionState::Disconnected {
                return Err(McpError::InvalidState {
                    expected: SessionState::Disconnected,
                    actual: *state,
                });
            }
            *state = SessionState::Connecting;
        }

        info!(server = %self.name(), "Connecting to tool server");

        let transport = self.transport.lock().take();
        let outbound_rx = self.outbound_rx.lock().take();
        let (Some(mut transport), Some(outbound_rx)) = (transport, outbound_rx) else {
            self.shared.set_state(SessionState::Failed);
            return Err(McpError::InvalidState {
                expected: SessionState::Disconnected,
                actual: SessionState::Failed,
            });
        };

        if let Err(e) = transport.open().await {
            error!(server = %self.name(), error = %e, "Failed to open transport");
            let _ = transport.close().await;
            self.shared.set_state(SessionState::Failed);
            return Err(e.into());
        }

        self.shared.set_state(SessionState::Handshaking);
        let worker = tokio::spawn(run_worker(
            self.shared.clone(),
            transport,
            outbound_rx,
            self.cancel.clone(),
        ));
        *self.worker.lock() = Some(worker);

        let tools = match self.handshake().await {
            Ok(tools) => tools,
            Err(e) => {
                error!(server = %self.name(), error = %e, "Handshake failed");
                self.shared.set_state(SessionState::Failed);
                self.stop_worker().await;
                return Err(e);
            }
        };

        *self.tools.write() = tools.clone();
        let became_ready = {
            let mut state = self.shared.state.write();
            if *state == SessionState::Handshaking {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        };
        if !became_ready {
            self.stop_worker().await;
            return Err(McpError::handshake(
                self.name(),
                "connection lost during handshake",
            ));
        }

        info!(server = %self.name(), tools = tools.len(), "Tool server ready");
        Ok(tools)
    }

    async fn handshake(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let deadline = self.options.handshake_timeout;
        let name = self.name().to_string();

        let params = serde_json::to_value(InitializeParams::default())?;
        let value = self
            .request(methods::INITIALIZE, methods::INITIALIZE, Some(params), deadline)
            .await
            .map_err(|e| McpError::handshake(&name, format!("initialize: {}", e)))?;
        let init: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::handshake(&name, format!("invalid initialize result: {}", e)))?;

        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %name,
                version = %init.protocol_version,
                "Server answered with a different protocol version"
            );
        }
        debug!(server = %name, remote = %init.server_info.name, "Initialized");
        *self.server_info.write() = Some(init.server_info);

        self.notify(methods::INITIALIZED, None)
            .await
            .map_err(|e| McpError::handshake(&name, e.to_string()))?;

        let mut tools = Vec::new();
        let mut cursor = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = serde_json::to_value(ListToolsParams { cursor: cursor.take() })?;
            let value = self
                .request(methods::TOOLS_LIST, methods::TOOLS_LIST, Some(params), deadline)
                .await
                .map_err(|e| McpError::handshake(&name, format!("tools/list: {}", e)))?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| McpError::handshake(&name, format!("invalid tools/list result: {}", e)))?;

            tools.extend(page.tools.into_iter().map(|t| t.into_descriptor(&name)));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(McpError::handshake(
            name,
            format!("tools/list did not finish within {} pages", MAX_TOOL_PAGES),
        ))
    }

    /// Invoke a tool. Only valid while `Ready`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ToolCallError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(ToolCallError::NotReady { state });
        }

        debug!(server = %self.name(), tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments: (!arguments.is_null()).then_some(arguments),
        };
        let params = serde_json::to_value(params)
            .map_err(|e| ToolCallError::MalformedResult(e.to_string()))?;

        let value = self
            .request(name, methods::TOOLS_CALL, Some(params), self.options.call_timeout)
            .await?;

        serde_json::from_value(value).map_err(|e| ToolCallError::MalformedResult(e.to_string()))
    }

    async fn request(
        &self,
        label: &str,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, ToolCallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| ToolCallError::MalformedResult(e.to_string()))?;

        let rx = self.shared.pending.insert(id);
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        if self.shared.outbound.send(frame).await.is_err() {
            return Err(ToolCallError::TransportClosed);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(ToolCallError::Remote {
                code: e.code,
                message: e.message,
            }),
            Ok(Err(_)) => Err(ToolCallError::TransportClosed),
            Err(_) => {
                warn!(server = %self.name(), method = method, "Request timed out");
                Err(ToolCallError::Timeout {
                    tool: label.to_string(),
                    after: deadline,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ToolCallError> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| ToolCallError::MalformedResult(e.to_string()))?;
        self.shared
            .outbound
            .send(frame)
            .await
            .map_err(|_| ToolCallError::TransportClosed)
    }

    async fn stop_worker(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// Close the session and release its transport.
    ///
    /// Waits up to the drain timeout for in-flight calls; the rest fail with
    /// `TransportClosed`. Safe to call in any state, any number of times.
    pub async fn close(&self) -> Result<(), McpError> {
        let previous = {
            let mut state = self.shared.state.write();
            let previous = *state;
            match previous {
                SessionState::Closing | SessionState::Closed => return Ok(()),
                SessionState::Failed => {}
                _ => *state = SessionState::Closing,
            }
            previous
        };

        if previous == SessionState::Ready {
            let drained = tokio::time::timeout(
                self.options.drain_timeout,
                self.shared.pending.wait_idle(),
            )
            .await;
            if drained.is_err() {
                warn!(
                    server = %self.name(),
                    pending = self.in_flight(),
                    "Closing with calls still in flight"
                );
            }
        }

        self.stop_worker().await;

        // Never connected: the transport was not handed to a worker.
        let transport = self.transport.lock().take();
        if let Some(mut transport) = transport {
            let _ = transport.close().await;
        }
        self.shared.pending.fail_all();

        if previous != SessionState::Failed {
            self.shared.set_state(SessionState::Closed);
        }
        info!(server = %self.name(), "Session closed");
        Ok(())
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        // The worker closes the transport on its way out.
        self.cancel.cancel();
    }
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
