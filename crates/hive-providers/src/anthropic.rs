//! Anthropic (Claude) adapter, Messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use hive_core::config::ProvidersConfig;
use hive_core::{Message, MessageContent, MessageId, ProviderError, Role, ToolDescriptor};

use crate::http::send_json;
use crate::schema::clean_schema;
use crate::traits::{output_text, trim_orphans, NormalizedReply, ProviderAdapter};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MODEL_ENV: &str = "ANTHROPIC_MODEL";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: ANTHROPIC_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Build from the `[providers.anthropic]` section and environment fallbacks.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let section = config.get("anthropic");
        let mut adapter = Self::new(config.api_key("anthropic"));
        if let Some(model) = section
            .and_then(|s| s.model.clone())
            .or_else(|| std::env::var(MODEL_ENV).ok().filter(|m| !m.is_empty()))
        {
            adapter = adapter.with_model(model);
        }
        if let Some(url) = section.and_then(|s| s.base_url.clone()) {
            adapter = adapter.with_base_url(url);
        }
        adapter
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn tool_use_id(id: MessageId) -> String {
        format!("toolu_{}", id)
    }

    fn convert_message(message: &Message) -> (&'static str, AnthropicContent) {
        match &message.content {
            MessageContent::Text { text } => {
                let role = if message.role == Role::Model { "assistant" } else { "user" };
                (role, AnthropicContent::Text { text: text.clone() })
            }
            MessageContent::ToolCall { name, arguments } => (
                "assistant",
                AnthropicContent::ToolUse {
                    id: Self::tool_use_id(message.id),
                    name: name.clone(),
                    input: arguments.clone(),
                },
            ),
            MessageContent::ToolResult { output, is_error, .. } => (
                "user",
                AnthropicContent::ToolResult {
                    tool_use_id: message.parent_id.map(Self::tool_use_id).unwrap_or_default(),
                    content: output_text(output),
                    is_error: *is_error,
                },
            ),
        }
    }

    fn parse_response(&self, response: AnthropicResponse) -> Result<NormalizedReply, ProviderError> {
        let mut text = Vec::new();
        for block in response.content {
            match block {
                AnthropicContent::ToolUse { name, input, .. } => {
                    return Ok(NormalizedReply::ToolCall {
                        name,
                        arguments: input,
                    });
                }
                AnthropicContent::Text { text: t } => text.push(t),
                AnthropicContent::ToolResult { .. } => {
                    return Err(ProviderError::malformed(
                        self.id(),
                        "reply contains a tool_result block",
                    ));
                }
            }
        }
        Ok(NormalizedReply::Text(text.join("")))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn convert_tools(&self, catalog: &[ToolDescriptor]) -> Value {
        let tools: Vec<AnthropicTool> = catalog
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: clean_schema(&tool.input_schema),
            })
            .collect();
        serde_json::to_value(tools).unwrap_or_default()
    }

    /// Adjacent turns of the same role are merged, and the context must
    /// open with a user turn.
    fn format_context(&self, messages: &[Message]) -> Value {
        let messages = trim_orphans(messages);
        let first_user = messages
            .iter()
            .take(messages.len().saturating_sub(1))
            .take_while(|m| m.role != Role::User)
            .count();

        let mut turns: Vec<AnthropicMessage> = Vec::new();
        for message in &messages[first_user..] {
            let (role, block) = Self::convert_message(message);
            match turns.last_mut() {
                Some(last) if last.role == role => last.content.push(block),
                _ => turns.push(AnthropicMessage {
                    role: role.to_string(),
                    content: vec![block],
                }),
            }
        }
        serde_json::to_value(turns).unwrap_or_default()
    }

    #[instrument(skip(self, context, tools), fields(model = %self.model))]
    async fn submit(&self, context: Value, tools: Value) -> Result<NormalizedReply, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(self.id()))?;

        let has_tools = tools.as_array().is_some_and(|t| !t.is_empty());
        let body = AnthropicRequest {
            model: self.model.clone(),
            messages: context,
            max_tokens: MAX_TOKENS,
            tools: has_tools.then_some(tools),
        };

        debug!("Sending request to Anthropic API");
        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let response: AnthropicResponse = send_json(self.id(), request).await?;
        self.parse_response(response)
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Value,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::fixtures;
    use chrono::Utc;
    use hive_core::{ConversationId, NewMessage};

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(Some("test-key".into()))
    }

    #[test]
    fn test_format_context_uses_blocks() {
        let context = adapter().format_context(&fixtures::tool_exchange());
        assert_eq!(
            context,
            json!([
                {"role": "user", "content": [{"type": "text", "text": "what is 2+2"}]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_2", "name": "add", "input": {"a": 2, "b": 2}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_2", "content": "{\"result\":[\"4\"]}"}
                ]}
            ])
        );
    }

    fn follow_up(mut messages: Vec<Message>) -> Vec<Message> {
        let parent = messages.last().unwrap().id;
        messages.push(
            NewMessage::user(ConversationId(1), Some(parent), "thanks")
                .into_message(MessageId(parent.0 + 1), Utc::now()),
        );
        messages
    }

    #[test]
    fn test_format_context_merges_same_role_turns() {
        let context = adapter().format_context(&follow_up(fixtures::tool_exchange()));
        let turns = context.as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2]["role"], "user");
        assert_eq!(turns[2]["content"][0]["type"], "tool_result");
        assert_eq!(turns[2]["content"][1], json!({"type": "text", "text": "thanks"}));
    }

    #[test]
    fn test_format_context_starts_with_user() {
        let mut messages = follow_up(fixtures::tool_exchange());
        // Truncated so that the call opens the context
        messages.remove(0);
        let context = adapter().format_context(&messages);
        assert_eq!(
            context,
            json!([{"role": "user", "content": [{"type": "text", "text": "thanks"}]}])
        );
    }

    #[test]
    fn test_orphaned_result_leaf_becomes_user_text() {
        // Budget only left room for the large result
        let messages = fixtures::tool_exchange()[2..].to_vec();
        let context = adapter().format_context(&messages);
        assert_eq!(
            context,
            json!([{"role": "user", "content": [
                {"type": "text", "text": "Tool `add` returned: {\"result\":[\"4\"]}"}
            ]}])
        );
    }

    #[test]
    fn test_error_results_are_flagged() {
        let mut messages = fixtures::tool_exchange();
        if let MessageContent::ToolResult { is_error, .. } = &mut messages[2].content {
            *is_error = true;
        }
        let context = adapter().format_context(&messages);
        assert_eq!(context[2]["content"][0]["is_error"], true);
    }

    #[test]
    fn test_parse_response() {
        let reply: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "I'll add them."},
                {"type": "tool_use", "id": "toolu_x", "name": "add", "input": {"a": 2, "b": 2}}
            ]
        }))
        .unwrap();
        assert_eq!(
            adapter().parse_response(reply).unwrap(),
            NormalizedReply::ToolCall {
                name: "add".into(),
                arguments: json!({"a": 2, "b": 2})
            }
        );

        let reply: AnthropicResponse =
            serde_json::from_value(json!({"content": [{"type": "text", "text": "4"}]})).unwrap();
        assert_eq!(adapter().parse_response(reply).unwrap(), NormalizedReply::Text("4".into()));
    }

    #[test]
    fn test_convert_tools_cleans_schema() {
        let catalog = vec![ToolDescriptor::new("add", "calc").with_schema(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"a": {"type": "number"}}
        }))];
        let tools = adapter().convert_tools(&catalog);
        assert_eq!(tools[0]["name"], "add");
        assert!(tools[0]["input_schema"].get("additionalProperties").is_none());
    }
}
