//! Conversation tree primitives.
//!
//! A conversation is a single rooted tree of [`Message`] nodes. Each node
//! points at its parent by id; a tool-call chain is a run of nodes hanging
//! off the user message that triggered it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a message node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Human input
    User,
    /// Model output (text or a tool call)
    Model,
    /// Output of a tool invocation
    ToolResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::ToolResult => "tool_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "model" => Some(Role::Model),
            "tool_result" => Some(Role::ToolResult),
            _ => None,
        }
    }

    /// Whether a message of this role may carry content of `kind`.
    pub fn allows(&self, kind: MessageKind) -> bool {
        matches!(
            (self, kind),
            (Role::User, MessageKind::Text)
                | (Role::Model, MessageKind::Text)
                | (Role::Model, MessageKind::ToolCall)
                | (Role::ToolResult, MessageKind::ToolResult)
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ToolCall,
    ToolResult,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::ToolCall => "tool_call",
            MessageKind::ToolResult => "tool_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "tool_call" => Some(MessageKind::ToolCall),
            "tool_result" => Some(MessageKind::ToolResult),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Free text from the user or the model
    Text { text: String },
    /// A tool invocation requested by the model
    ToolCall { name: String, arguments: Value },
    /// The structured output of a tool invocation
    ToolResult {
        name: String,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            arguments,
        }
    }

    pub fn tool_result(name: impl Into<String>, output: Value, is_error: bool) -> Self {
        Self::ToolResult {
            name: name.into(),
            output,
            is_error,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::ToolCall { .. } => MessageKind::ToolCall,
            Self::ToolResult { .. } => MessageKind::ToolResult,
        }
    }

    /// The text payload, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Heuristic token cost of this payload.
    ///
    /// Tool arguments and outputs are costed by their JSON serialisation.
    pub fn estimate_tokens(&self) -> u32 {
        match self {
            Self::Text { text } => estimate_tokens(text),
            Self::ToolCall { arguments, .. } => estimate_json_tokens(arguments),
            Self::ToolResult { output, .. } => estimate_json_tokens(output),
        }
    }
}

/// Estimate the token count of a piece of text: roughly four characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as u64;
    u32::try_from(chars / 4 + 1).unwrap_or(u32::MAX)
}

fn estimate_json_tokens(value: &Value) -> u32 {
    if value.is_null() {
        return 0;
    }
    estimate_tokens(&value.to_string())
}

/// A stored node of a conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub parent_id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub kind: MessageKind,
    pub content: MessageContent,
    /// Model provider that produced this node
    pub provider: Option<String>,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub parent_id: Option<MessageId>,
    pub role: Role,
    pub content: MessageContent,
    pub provider: Option<String>,
}

impl NewMessage {
    pub fn new(
        conversation_id: ConversationId,
        parent_id: Option<MessageId>,
        role: Role,
        content: MessageContent,
    ) -> Self {
        Self {
            conversation_id,
            parent_id,
            role,
            content,
            provider: None,
        }
    }

    /// A user text message.
    pub fn user(
        conversation_id: ConversationId,
        parent_id: Option<MessageId>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(conversation_id, parent_id, Role::User, MessageContent::text(text))
    }

    /// A final model text reply.
    pub fn model_text(
        conversation_id: ConversationId,
        parent_id: MessageId,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            conversation_id,
            Some(parent_id),
            Role::Model,
            MessageContent::text(text),
        )
    }

    /// A tool call requested by the model.
    pub fn tool_call(
        conversation_id: ConversationId,
        parent_id: MessageId,
        name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self::new(
            conversation_id,
            Some(parent_id),
            Role::Model,
            MessageContent::tool_call(name, arguments),
        )
    }

    /// The output of a tool call.
    pub fn tool_result(
        conversation_id: ConversationId,
        parent_id: MessageId,
        name: impl Into<String>,
        output: Value,
        is_error: bool,
    ) -> Self {
        Self::new(
            conversation_id,
            Some(parent_id),
            Role::ToolResult,
            MessageContent::tool_result(name, output, is_error),
        )
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    /// Whether role and payload shape fit together.
    pub fn is_well_formed(&self) -> bool {
        self.role.allows(self.content.kind())
    }

    /// Turn this into a stored message with the given id and timestamp.
    pub fn into_message(self, id: MessageId, created_at: DateTime<Utc>) -> Message {
        let token_count = self.content.estimate_tokens();
        Message {
            id,
            parent_id: self.parent_id,
            conversation_id: self.conversation_id,
            role: self.role,
            kind: self.content.kind(),
            content: self.content,
            provider: self.provider,
            token_count,
            created_at,
        }
    }
}

/// Groups the messages of one dialogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    /// Title used when a conversation is started without one.
    pub fn default_title(now: DateTime<Utc>) -> String {
        format!("Conversation {}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 2);
        assert_eq!(estimate_tokens("what is 2+2"), 3);
    }

    #[test]
    fn test_tool_call_tokens_use_arguments_json() {
        let content = MessageContent::tool_call("add", json!({"a": 2, "b": 2}));
        // {"a":2,"b":2} is 13 chars
        assert_eq!(content.estimate_tokens(), 4);

        let empty = MessageContent::tool_call("noop", Value::Null);
        assert_eq!(empty.estimate_tokens(), 0);
    }

    #[test]
    fn test_role_kind_compatibility() {
        assert!(Role::User.allows(MessageKind::Text));
        assert!(!Role::User.allows(MessageKind::ToolCall));
        assert!(Role::Model.allows(MessageKind::ToolCall));
        assert!(!Role::Model.allows(MessageKind::ToolResult));
        assert!(Role::ToolResult.allows(MessageKind::ToolResult));
        assert!(!Role::ToolResult.allows(MessageKind::Text));
    }

    #[test]
    fn test_new_message_into_message() {
        let msg = NewMessage::tool_result(
            ConversationId(1),
            MessageId(2),
            "add",
            json!({"result": "4"}),
            false,
        )
        .with_provider("gemini")
        .into_message(MessageId(3), Utc::now());

        assert_eq!(msg.role, Role::ToolResult);
        assert_eq!(msg.kind, MessageKind::ToolResult);
        assert_eq!(msg.parent_id, Some(MessageId(2)));
        assert_eq!(msg.provider.as_deref(), Some("gemini"));
        assert!(msg.token_count > 0);
    }

    #[test]
    fn test_content_serialization() {
        let content = MessageContent::text("hello");
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hello"}"#);

        let back: MessageContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_role_round_trip_strings() {
        for role in [Role::User, Role::Model, Role::ToolResult] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("assistant"), None);
    }
}
