//! In-process tool servers.
//!
//! A [`LocalServer`] answers the tool protocol over a [`MemoryPeer`] using
//! async Rust handlers. It lets tools written in Rust be registered next to
//! external servers, and gives tests a real server to talk to.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::protocol::{
    methods, CallToolParams, CallToolResult, CancelledParams, IncomingMessage, InitializeResult,
    JsonRpcError, JsonRpcResponse, ListToolsParams, ListToolsResult, RequestId,
    ServerCapabilities, ServerInfo, ToolDefinition, ToolsCapability, PROTOCOL_VERSION,
};
use crate::transport::{MemoryPeer, MemoryTransport};

/// Result of a local tool handler. `Err` becomes a tool result flagged `isError`.
pub type ToolFuture = BoxFuture<'static, Result<CallToolResult, String>>;

type Handler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

struct LocalTool {
    definition: ToolDefinition,
    handler: Handler,
}

pub struct LocalServer {
    name: String,
    version: String,
    tools: Vec<LocalTool>,
    page_size: Option<usize>,
}

impl LocalServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tools: Vec::new(),
            page_size: None,
        }
    }

    /// Register a tool.
    pub fn tool<F, Fut>(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, String>> + Send + 'static,
    {
        self.tools.push(LocalTool {
            definition: ToolDefinition {
                name: name.into(),
                description: Some(description.into()),
                input_schema,
            },
            handler: Arc::new(move |args| handler(args).boxed()),
        });
        self
    }

    /// Split `tools/list` into pages of `size` tools.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Start serving and return the client end, ready to hand to a session.
    pub fn connect(self) -> (MemoryTransport, LocalServerHandle) {
        let (transport, peer) = MemoryTransport::pair();
        let handle = self.spawn(peer);
        (transport, handle)
    }

    pub fn spawn(self, peer: MemoryPeer) -> LocalServerHandle {
        let journal = Arc::new(Journal::default());
        let task = tokio::spawn(serve(self, peer, journal.clone()));
        LocalServerHandle { task, journal }
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                other: Default::default(),
            },
            server_info: ServerInfo {
                name: self.name.clone(),
                version: Some(self.version.clone()),
            },
        }
    }

    fn list_page(&self, params: Option<Value>) -> ListToolsResult {
        let cursor = params
            .and_then(|p| serde_json::from_value::<ListToolsParams>(p).ok())
            .and_then(|p| p.cursor)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let size = self.page_size.unwrap_or(self.tools.len().max(1));
        let end = (cursor + size).min(self.tools.len());

        ListToolsResult {
            tools: self
                .tools
                .get(cursor..end)
                .unwrap_or_default()
                .iter()
                .map(|t| t.definition.clone())
                .collect(),
            next_cursor: (end < self.tools.len()).then(|| end.to_string()),
        }
    }
}

/// Methods the server has seen, for observing it from tests and diagnostics.
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<(bool, String)>>,
    changed: Notify,
}

impl Journal {
    fn record(&self, is_request: bool, method: &str) {
        self.entries.lock().push((is_request, method.to_string()));
        self.changed.notify_waiters();
    }

    fn contains(&self, is_request: bool, method: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(r, m)| *r == is_request && m == method)
    }

    async fn wait_for(&self, is_request: bool, method: &str, limit: Duration) -> bool {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if self.contains(is_request, method) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }
}

/// Handle to a running local server.
pub struct LocalServerHandle {
    task: JoinHandle<()>,
    journal: Arc<Journal>,
}

const WAIT_LIMIT: Duration = Duration::from_secs(5);

impl LocalServerHandle {
    /// Methods of every request and notification received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.journal
            .entries
            .lock()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Wait (up to five seconds) until a request with this method arrives.
    pub async fn wait_for_request(&self, method: &str) -> bool {
        self.journal.wait_for(true, method, WAIT_LIMIT).await
    }

    /// Wait (up to five seconds) until a notification with this method arrives.
    pub async fn wait_for_notification(&self, method: &str) -> bool {
        self.journal.wait_for(false, method, WAIT_LIMIT).await
    }

    /// Stop serving; the client sees the connection close.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LocalServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum ServeEvent {
    Frame(String),
    Reply(String),
    Reaped,
}

async fn serve(server: LocalServer, mut peer: MemoryPeer, journal: Arc<Journal>) {
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(64);
    let mut running: JoinSet<()> = JoinSet::new();
    let mut in_flight: HashMap<RequestId, AbortHandle> = HashMap::new();

    loop {
        let event = tokio::select! {
            frame = peer.recv() => match frame {
                Some(frame) => ServeEvent::Frame(frame),
                None => break,
            },
            Some(reply) = reply_rx.recv() => ServeEvent::Reply(reply),
            Some(_) = running.join_next(), if !running.is_empty() => ServeEvent::Reaped,
        };

        let outgoing = match event {
            ServeEvent::Reaped => {
                in_flight.retain(|_, handle| !handle.is_finished());
                continue;
            }
            ServeEvent::Reply(reply) => reply,
            ServeEvent::Frame(frame) => {
                let message = match IncomingMessage::parse(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(server = %server.name, error = %e, "Local server got a bad frame");
                        continue;
                    }
                };
                match message {
                    IncomingMessage::Notification { method, params } => {
                        journal.record(false, &method);
                        if method == methods::CANCELLED {
                            let cancelled =
                                params.and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                            if let Some(handle) =
                                cancelled.and_then(|c| in_flight.remove(&c.request_id))
                            {
                                debug!(server = %server.name, "Cancelling local tool call");
                                handle.abort();
                            }
                        }
                        continue;
                    }
                    IncomingMessage::Response { .. } => continue,
                    IncomingMessage::Request { id, method, params } => {
                        journal.record(true, &method);
                        let response = match method.as_str() {
                            methods::INITIALIZE => success(id, &server.initialize_result()),
                            methods::TOOLS_LIST => success(id, &server.list_page(params)),
                            methods::PING => JsonRpcResponse::success(id, json!({})),
                            methods::TOOLS_CALL => {
                                match start_call(&server, id.clone(), params, reply_tx.clone()) {
                                    Ok(job) => {
                                        in_flight.insert(id, running.spawn(job));
                                        continue;
                                    }
                                    Err(error) => JsonRpcResponse::failure(id, error),
                                }
                            }
                            other => JsonRpcResponse::failure(id, JsonRpcError::method_not_found(other)),
                        };
                        match serde_json::to_string(&response) {
                            Ok(frame) => frame,
                            Err(_) => continue,
                        }
                    }
                }
            }
        };

        if peer.send(outgoing).await.is_err() {
            break;
        }
    }
}

fn success<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::failure(
            id,
            JsonRpcError {
                code: JsonRpcError::INTERNAL_ERROR,
                message: e.to_string(),
                data: None,
            },
        ),
    }
}

/// Validate a `tools/call` and build the job that runs the handler.
fn start_call(
    server: &LocalServer,
    id: RequestId,
    params: Option<Value>,
    replies: mpsc::Sender<String>,
) -> Result<BoxFuture<'static, ()>, JsonRpcError> {
    let params: CallToolParams = params
        .and_then(|p| serde_json::from_value(p).ok())
        .ok_or_else(|| JsonRpcError {
            code: JsonRpcError::INVALID_PARAMS,
            message: "tools/call needs a tool name".to_string(),
            data: None,
        })?;

    let tool = server
        .tools
        .iter()
        .find(|t| t.definition.name == params.name)
        .ok_or_else(|| JsonRpcError {
            code: JsonRpcError::INVALID_PARAMS,
            message: format!("Unknown tool: {}", params.name),
            data: None,
        })?;

    let handler = tool.handler.clone();
    let arguments = params.arguments.unwrap_or_else(|| json!({}));

    Ok(async move {
        let result = match handler(arguments).await {
            Ok(result) => result,
            Err(message) => CallToolResult {
                content: vec![crate::protocol::ToolContent::text(message)],
                is_error: true,
            },
        };
        if let Ok(frame) = serde_json::to_string(&success(id, &result)) {
            let _ = replies.send(frame).await;
        }
    }
    .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[tokio::test]
    async fn test_answers_protocol_requests() {
        let server = LocalServer::new("echo").tool(
            "echo",
            "Echo the input",
            json!({"type": "object"}),
            |args| async move { Ok(CallToolResult::text(args["text"].as_str().unwrap_or("").to_string())) },
        );
        let (mut transport, handle) = server.connect();
        transport.open().await.unwrap();

        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"]["tools"][0]["name"], "echo");
        assert!(reply["result"].get("nextCursor").is_none());

        transport
            .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"]["content"][0]["text"], "hi");

        assert_eq!(handle.received(), vec!["tools/list", "tools/call"]);
    }

    #[tokio::test]
    async fn test_handler_error_is_flagged() {
        let server = LocalServer::new("grumpy").tool(
            "fail",
            "Always fails",
            json!({"type": "object"}),
            |_| async { Err("no thanks".to_string()) },
        );
        let (mut transport, _handle) = server.connect();
        transport.open().await.unwrap();

        transport
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"fail"}}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["content"][0]["text"], "no thanks");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (mut transport, _handle) = LocalServer::new("empty").connect();
        transport.open().await.unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&transport.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }
}
