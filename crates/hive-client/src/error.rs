//! Errors surfaced by the orchestrating client.

use thiserror::Error;

use hive_core::ProviderError;
use hive_mcp::McpError;
use hive_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Mcp(#[from] McpError),

    /// The model kept asking for tools past the configured bound.
    #[error("the model requested more than {limit} tool calls for one query")]
    ToolLoopExceeded { limit: usize },

    #[error("no model provider is configured")]
    NoActiveProvider,

    #[error("query cancelled")]
    Cancelled,
}

impl ClientError {
    /// Fatal to the query because credentials are missing or rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Provider(e) if e.is_auth())
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ClientError::Provider(e) => e.recovery_suggestion(),
            ClientError::Mcp(e) => e.recovery_suggestion(),
            ClientError::ToolLoopExceeded { .. } => {
                Some("Raise limits.max_tool_iterations or rephrase the request")
            }
            ClientError::NoActiveProvider => {
                Some("Set GEMINI_API_KEY, GROQ_API_KEY or ANTHROPIC_API_KEY")
            }
            _ => None,
        }
    }
}

/// Render an error with its recovery hint, if any.
pub fn format_client_error(error: &ClientError) -> String {
    match error.recovery_suggestion() {
        Some(suggestion) => format!("{}\n  Suggestion: {}", error, suggestion),
        None => error.to_string(),
    }
}
