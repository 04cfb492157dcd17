//! Registry of connected tool servers and their merged tool catalog.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use hive_core::{ServerDescriptor, ToolDescriptor};

use crate::error::McpError;
use crate::protocol::CallToolResult;
use crate::session::{ServerSession, SessionOptions, SessionState};
use crate::transport::{self, Transport};

/// Summary of one registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    /// Name the server was registered under
    pub name: String,
    /// Current session lifecycle state
    pub state: SessionState,
    /// Tools this server contributes to the catalog
    pub tool_count: usize,
}

#[derive(Default)]
struct Inner {
    /// Live sessions keyed by server name
    sessions: HashMap<String, Arc<ServerSession>>,
    /// Tool name to descriptor; the descriptor names the owning server
    catalog: BTreeMap<String, ToolDescriptor>,
    /// Names with a connection in progress
    reserved: HashSet<String>,
}

/// Owns every server session and routes tool calls by name.
pub struct SessionRegistry {
    /// Sessions and catalog, updated together
    inner: RwLock<Inner>,
    /// Options handed to every new session
    options: SessionOptions,
    /// Upper bound on closing one session in `shutdown_all`
    shutdown_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl SessionRegistry {
    pub fn new(options: SessionOptions) -> Self {
        let shutdown_timeout = options.drain_timeout;
        Self {
            inner: RwLock::new(Inner::default()),
            options,
            shutdown_timeout,
        }
    }

    /// Bound on closing one session during [`shutdown_all`](Self::shutdown_all).
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Connect to a server and add its tools to the catalog.
    pub async fn register(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Vec<ToolDescriptor>, McpError> {
        debug!(server = %descriptor.name, transport = %descriptor.transport, "Registering server");
        let transport = transport::from_kind(&descriptor.transport);
        self.register_transport(&descriptor.name, transport).await
    }

    /// Register a server reached through a caller-built transport.
    ///
    /// The session is connected outside the registry lock. If any of its tools
    /// collides with a tool already in the catalog, the new session is closed
    /// and nothing is added.
    pub async fn register_transport(
        &self,
        name: &str,
        transport: Box<dyn Transport>,
    ) -> Result<Vec<ToolDescriptor>, McpError> {
        {
            let mut inner = self.inner.write().await;
            if inner.sessions.contains_key(name) || !inner.reserved.insert(name.to_string()) {
                return Err(McpError::ServerAlreadyExists(name.to_string()));
            }
        }

        let session = Arc::new(ServerSession::new(name, transport, self.options.clone()));
        let tools = match session.connect().await {
            Ok(tools) => tools,
            Err(e) => {
                self.inner.write().await.reserved.remove(name);
                return Err(e);
            }
        };

        let collision = {
            let mut inner = self.inner.write().await;
            inner.reserved.remove(name);

            match find_collision(&inner.catalog, &tools) {
                Some(collision) => Some(collision),
                None => {
                    for tool in &tools {
                        inner.catalog.insert(tool.name.clone(), tool.clone());
                    }
                    inner.sessions.insert(name.to_string(), session.clone());
                    None
                }
            }
        };

        if let Some((tool, existing_server)) = collision {
            warn!(
                server = name,
                tool = %tool,
                existing = %existing_server,
                "Tool name collision, rejecting server"
            );
            let _ = session.close().await;
            return Err(McpError::DuplicateTool {
                tool,
                server: name.to_string(),
                existing_server,
            });
        }

        info!(server = name, tools = tools.len(), "Server registered");
        Ok(tools)
    }

    /// Route a tool call to the server that owns the tool.
    ///
    /// Errors from the session are returned unchanged; nothing is retried.
    pub async fn dispatch(&self, tool: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let session = {
            let inner = self.inner.read().await;
            let descriptor = inner
                .catalog
                .get(tool)
                .ok_or_else(|| McpError::UnknownTool(tool.to_string()))?;
            inner
                .sessions
                .get(&descriptor.server)
                .cloned()
                .ok_or_else(|| McpError::UnknownTool(tool.to_string()))?
        };

        debug!(tool = tool, server = %session.name(), "Dispatching tool call");
        Ok(session.call_tool(tool, arguments).await?)
    }

    /// Remove a server: its tools leave the catalog first, then the session closes.
    pub async fn unregister(&self, name: &str) -> Result<(), McpError> {
        let session = {
            let mut inner = self.inner.write().await;
            let session = inner
                .sessions
                .remove(name)
                .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
            inner.catalog.retain(|_, tool| tool.server != name);
            session
        };

        session.close().await?;
        info!(server = name, "Server unregistered");
        Ok(())
    }

    /// Close every session concurrently, each bounded by the shutdown timeout.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<ServerSession>> = {
            let mut inner = self.inner.write().await;
            inner.catalog.clear();
            inner.sessions.drain().map(|(_, session)| session).collect()
        };

        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "Shutting down tool servers");

        let limit = self.shutdown_timeout;
        let closes = sessions.into_iter().map(|session| async move {
            match tokio::time::timeout(limit, session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(server = %session.name(), error = %e, "Error closing server"),
                Err(_) => error!(
                    server = %session.name(),
                    timeout_secs = limit.as_secs(),
                    "Server did not close in time, abandoning it"
                ),
            }
        });
        futures::future::join_all(closes).await;
    }

    /// The merged catalog, sorted by tool name.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.inner.read().await.catalog.values().cloned().collect()
    }

    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let inner = self.inner.read().await;
        let mut servers: Vec<ServerStatus> = inner
            .sessions
            .values()
            .map(|session| ServerStatus {
                name: session.name().to_string(),
                state: session.state(),
                tool_count: inner
                    .catalog
                    .values()
                    .filter(|t| t.server == session.name())
                    .count(),
            })
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn server_for(&self, tool: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .catalog
            .get(tool)
            .map(|t| t.server.clone())
    }

    pub async fn contains_server(&self, name: &str) -> bool {
        self.inner.read().await.sessions.contains_key(name)
    }
}

/// First tool in `tools` whose name is already taken, with the server that holds it.
fn find_collision(
    catalog: &BTreeMap<String, ToolDescriptor>,
    tools: &[ToolDescriptor],
) -> Option<(String, String)> {
    let mut seen = HashSet::new();
    for tool in tools {
        if let Some(existing) = catalog.get(&tool.name) {
            return Some((tool.name.clone(), existing.server.clone()));
        }
        if !seen.insert(tool.name.as_str()) {
            return Some((tool.name.clone(), tool.server.clone()));
        }
    }
    None
}
