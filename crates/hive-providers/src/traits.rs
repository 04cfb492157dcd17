//! Provider adapter trait definitions.

use std::borrow::Cow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use hive_core::{Message, MessageContent, MessageKind, ProviderError, Role, ToolDescriptor};

/// What a model answered, independent of vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedReply {
    /// Final text for the user
    Text(String),
    /// The model wants a tool run before it continues
    ToolCall { name: String, arguments: Value },
}

impl NormalizedReply {
    pub fn is_tool_call(&self) -> bool {
        matches!(self, NormalizedReply::ToolCall { .. })
    }
}

/// Translation layer to one model vendor's API.
///
/// Adapters keep no conversation state: every `submit` carries the full
/// context and results in exactly one HTTP request.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identifier, as used in configuration and `use provider`.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Model requested from the vendor.
    fn model(&self) -> &str;

    /// Credentials are present.
    fn is_configured(&self) -> bool;

    /// Translate the merged tool catalog into the vendor's tool format.
    fn convert_tools(&self, catalog: &[ToolDescriptor]) -> Value;

    /// Translate a linear context into the vendor's message format.
    fn format_context(&self, messages: &[Message]) -> Value;

    /// Send one request and normalise the answer.
    async fn submit(&self, context: Value, tools: Value) -> Result<NormalizedReply, ProviderError>;

    /// Format and submit in one step.
    async fn respond(
        &self,
        messages: &[Message],
        catalog: &[ToolDescriptor],
    ) -> Result<NormalizedReply, ProviderError> {
        let context = self.format_context(messages);
        let tools = self.convert_tools(catalog);
        self.submit(context, tools).await
    }
}

/// Drop leading tool results whose call was trimmed out of the context.
///
/// The last message is always kept. When that message is itself a result
/// without its call, it is restated as user text, since vendors reject a
/// tool result that answers no visible call.
pub fn trim_orphans(messages: &[Message]) -> Cow<'_, [Message]> {
    let orphans = messages
        .iter()
        .take(messages.len().saturating_sub(1))
        .take_while(|m| m.role == Role::ToolResult)
        .count();
    let rest = &messages[orphans..];

    match rest.first() {
        Some(first) if first.role == Role::ToolResult => {
            let mut owned = rest.to_vec();
            owned[0] = restate_as_user(first);
            Cow::Owned(owned)
        }
        _ => Cow::Borrowed(rest),
    }
}

fn restate_as_user(message: &Message) -> Message {
    let text = match &message.content {
        MessageContent::ToolResult {
            name,
            output,
            is_error,
        } => {
            let label = if *is_error { "failed" } else { "returned" };
            format!("Tool `{}` {}: {}", name, label, output_text(output))
        }
        other => other.as_text().unwrap_or_default().to_string(),
    };
    Message {
        role: Role::User,
        kind: MessageKind::Text,
        content: MessageContent::text(text),
        ..message.clone()
    }
}

/// Tool output as a compact JSON string, for vendors that want text.
pub(crate) fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use hive_core::{ConversationId, Message, MessageId, NewMessage};
    use serde_json::json;

    /// user -> add(2,2) -> {"result": ["4"]}, ids 1..=3.
    pub fn tool_exchange() -> Vec<Message> {
        let c = ConversationId(1);
        vec![
            NewMessage::user(c, None, "what is 2+2").into_message(MessageId(1), Utc::now()),
            NewMessage::tool_call(c, MessageId(1), "add", json!({"a": 2, "b": 2}))
                .into_message(MessageId(2), Utc::now()),
            NewMessage::tool_result(c, MessageId(2), "add", json!({"result": ["4"]}), false)
                .into_message(MessageId(3), Utc::now()),
        ]
    }

    pub fn with_answer(mut messages: Vec<Message>, text: &str) -> Vec<Message> {
        let parent = messages.last().map(|m| m.id).unwrap_or(MessageId(0));
        let id = MessageId(parent.0 + 1);
        messages.push(NewMessage::model_text(ConversationId(1), parent, text).into_message(id, Utc::now()));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::MessageId;

    #[test]
    fn test_trim_orphans() {
        let messages = fixtures::tool_exchange();
        assert_eq!(trim_orphans(&messages).len(), 3);

        // Context cut right after the call: the result is orphaned
        let cut = &messages[2..];
        let kept = trim_orphans(cut);
        assert_eq!(kept.len(), 1, "a lone leaf is kept");
        assert_eq!(kept[0].role, Role::User);
        assert_eq!(kept[0].id, MessageId(3));
        assert_eq!(kept[0].text(), Some(r#"Tool `add` returned: {"result":["4"]}"#));
        assert!(matches!(trim_orphans(&messages), Cow::Borrowed(_)));

        let answered = fixtures::with_answer(messages, "4");
        let trimmed = trim_orphans(&answered[2..]);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].role, Role::Model);
    }

    #[test]
    fn test_reply_serialization() {
        let reply = NormalizedReply::ToolCall {
            name: "add".into(),
            arguments: serde_json::json!({"a": 1}),
        };
        assert!(reply.is_tool_call());
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert!(!NormalizedReply::Text("hi".into()).is_tool_call());
    }
}
