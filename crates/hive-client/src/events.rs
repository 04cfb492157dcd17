//! Progress hooks for a running query.

use serde_json::Value;

use hive_core::Message;

/// Observer of one query's progress. Every hook defaults to a no-op.
///
/// Hooks run inline on the query task and should return quickly.
pub trait QueryEventHandler: Send + Sync {
    /// About to ask the model.
    fn on_thinking(&self, _provider: &str) {}

    /// The model asked for a tool.
    fn on_tool_start(&self, _tool: &str, _arguments: &Value) {}

    /// The tool finished; `output` is what was stored.
    fn on_tool_complete(&self, _tool: &str, _output: &Value, _is_error: bool) {}

    /// The final reply has been stored.
    fn on_reply(&self, _message: &Message) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl QueryEventHandler for NoOpHandler {}
