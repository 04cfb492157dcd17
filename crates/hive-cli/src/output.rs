//! Terminal formatting helpers.

use chrono::{DateTime, Local, Utc};
use serde_json::Value;

use hive_core::{Message, MessageContent};

pub fn check(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

pub fn warning(text: &str) -> String {
    format!("Warning: {}", text)
}

/// Format a datetime in local time for display.
pub fn format_time(dt: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = dt.with_timezone(&Local);
    local.format("%Y-%m-%d %H:%M").to_string()
}

/// Shorten `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Compact single-line JSON for tool arguments and outputs.
pub fn compact_json(value: &Value, max: usize) -> String {
    truncate(&value.to_string(), max)
}

/// One line describing a stored message.
pub fn format_message(message: &Message) -> String {
    let body = match &message.content {
        MessageContent::Text { text } => text.clone(),
        MessageContent::ToolCall { name, arguments } => {
            format!("call {}({})", name, compact_json(arguments, 200))
        }
        MessageContent::ToolResult {
            name,
            output,
            is_error,
        } => {
            let label = if *is_error { "error" } else { "result" };
            format!("{} {}: {}", label, name, compact_json(output, 200))
        }
    };
    let provider = message
        .provider
        .as_deref()
        .map(|p| format!(" [{}]", p))
        .unwrap_or_default();
    format!(
        "#{} {}{}: {}",
        message.id,
        message.role.as_str(),
        provider,
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{ConversationId, MessageId, NewMessage};
    use serde_json::json;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééé", 5), "ééééé");
    }

    #[test]
    fn test_format_tool_call() {
        let message = NewMessage::tool_call(ConversationId(1), MessageId(1), "add", json!({"a": 2}))
            .with_provider("groq")
            .into_message(MessageId(2), Utc::now());
        assert_eq!(format_message(&message), "#2 model [groq]: call add({\"a\":2})");
    }

    #[test]
    fn test_format_error_result() {
        let message = NewMessage::tool_result(
            ConversationId(1),
            MessageId(2),
            "add",
            json!({"error": "boom"}),
            true,
        )
        .into_message(MessageId(3), Utc::now());
        assert_eq!(format_message(&message), "#3 tool_result: error add: {\"error\":\"boom\"}");
    }
}
