//! Query event handler that reports progress on the terminal.

use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use hive_client::QueryEventHandler;

use crate::output::compact_json;

/// Prints tool activity to stderr while a query runs.
#[derive(Default)]
pub struct CliEventHandler {
    /// Track when tools start for duration calculation
    tool_start: Mutex<Option<Instant>>,
}

impl CliEventHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryEventHandler for CliEventHandler {
    fn on_thinking(&self, provider: &str) {
        tracing::debug!(provider, "Waiting for model");
    }

    fn on_tool_start(&self, tool: &str, arguments: &Value) {
        *self.tool_start.lock() = Some(Instant::now());
        eprintln!("[Tool: {}] {}", tool, compact_json(arguments, 120));
    }

    fn on_tool_complete(&self, tool: &str, output: &Value, is_error: bool) {
        let elapsed = self
            .tool_start
            .lock()
            .take()
            .map(|start| start.elapsed().as_millis())
            .unwrap_or_default();

        let status = if is_error { "FAILED" } else { "OK" };
        eprintln!("[Tool: {}] {} ({}ms)", tool, status, elapsed);
        if is_error {
            if let Some(error) = output.get("error").and_then(Value::as_str) {
                eprintln!("[Error: {}]", error);
            }
        }
    }
}
