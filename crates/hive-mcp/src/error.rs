//! Error types for transports, sessions and the registry.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the server.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Failed to write, or the transport is closed.
    #[error("write error: {0}")]
    WriteError(String),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(String),

    /// Transport is not open.
    #[error("connection closed")]
    ConnectionClosed,

    /// The event stream dropped again right after a reconnect.
    #[error("event stream lost after reconnect attempt")]
    StreamLost,

    /// HTTP-level failure on the event stream transport.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Whether this error happened while opening the transport.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed(_) | TransportError::SpawnFailed(_)
        )
    }
}

/// Why a single tool invocation failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolCallError {
    /// No response within the per-call deadline; the session stays usable.
    #[error("tool '{tool}' timed out after {}s", after.as_secs())]
    Timeout { tool: String, after: Duration },

    /// The server answered with a JSON-RPC error.
    #[error("server error (code {code}): {message}")]
    Remote { code: i32, message: String },

    /// The transport went away before an answer arrived.
    #[error("transport closed before the call completed")]
    TransportClosed,

    /// The server answered with something that is not a tool result.
    #[error("malformed tool result: {0}")]
    MalformedResult(String),

    /// The session cannot take calls in its current state.
    #[error("session is not ready (state: {state})")]
    NotReady { state: SessionState },
}

/// Errors raised by sessions and the registry.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server did not complete `initialize` or `tools/list`.
    #[error("handshake with '{server}' failed: {message}")]
    Handshake { server: String, message: String },

    #[error("tool call failed: {0}")]
    ToolCall(#[from] ToolCallError),

    /// Two servers declare the same tool name.
    #[error("tool '{tool}' from server '{server}' is already provided by '{existing_server}'")]
    DuplicateTool {
        tool: String,
        server: String,
        existing_server: String,
    },

    /// No registered server provides this tool.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server already exists: {0}")]
    ServerAlreadyExists(String),

    /// Operation not valid for the session's state.
    #[error("invalid session state: expected {expected}, got {actual}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn handshake(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handshake {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is confined to one tool invocation.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, McpError::ToolCall(_) | McpError::UnknownTool(_))
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            McpError::Transport(e) if e.is_connect_error() => {
                Some("Check the server command or URL in the [servers] section of your config")
            }
            McpError::DuplicateTool { .. } => {
                Some("Rename the tool on one server or disable one of the servers")
            }
            McpError::ToolCall(ToolCallError::Timeout { .. }) => {
                Some("Raise limits.tool_call_timeout_secs if the tool is just slow")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::DuplicateTool {
            tool: "add".into(),
            server: "calc2".into(),
            existing_server: "calc".into(),
        };
        assert_eq!(
            err.to_string(),
            "tool 'add' from server 'calc2' is already provided by 'calc'"
        );

        let err = ToolCallError::Timeout {
            tool: "slow".into(),
            after: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "tool 'slow' timed out after 60s");

        let err = ToolCallError::NotReady {
            state: SessionState::Failed,
        };
        assert_eq!(err.to_string(), "session is not ready (state: failed)");
    }

    #[test]
    fn test_classification() {
        assert!(McpError::UnknownTool("x".into()).is_tool_failure());
        assert!(McpError::from(ToolCallError::TransportClosed).is_tool_failure());
        assert!(!McpError::ServerNotFound("x".into()).is_tool_failure());

        let connect = McpError::from(TransportError::ConnectFailed("refused".into()));
        assert!(connect.recovery_suggestion().is_some());
    }
}
