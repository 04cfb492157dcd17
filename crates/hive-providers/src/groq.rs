//! Groq adapter (OpenAI-compatible chat completions).

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

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3-70b-8192";
const MODEL_ENV: &str = "GROQ_MODEL";

/// Prepended to every context.
const SYSTEM_PROMPT: &str = "You are a helpful assistant that can use tools when needed. \
                             Always use tools when available and appropriate for the task.";

pub struct GroqAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GroqAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GROQ_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Build from the `[providers.groq]` section and environment fallbacks.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let section = config.get("groq");
        let mut adapter = Self::new(config.api_key("groq"));
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

    fn call_id(id: MessageId) -> String {
        format!("call_{}", id)
    }

    fn convert_message(message: &Message) -> ChatMessage {
        match &message.content {
            MessageContent::Text { text } => ChatMessage {
                role: match message.role {
                    Role::Model => "assistant",
                    _ => "user",
                }
                .to_string(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            MessageContent::ToolCall { name, arguments } => ChatMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(vec![ChatToolCall {
                    id: Self::call_id(message.id),
                    call_type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: name.clone(),
                        arguments: arguments.to_string(),
                    },
                }]),
                tool_call_id: None,
            },
            MessageContent::ToolResult { output, .. } => ChatMessage {
                role: "tool".to_string(),
                content: Some(output_text(output)),
                tool_calls: None,
                // Results hang directly off their call
                tool_call_id: message.parent_id.map(Self::call_id),
            },
        }
    }

    fn parse_response(&self, response: ChatResponse) -> Result<NormalizedReply, ProviderError> {
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ProviderError::malformed(self.id(), "reply has no choices"))?;

        // Only the first requested call is honoured
        if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
            let raw = call.function.arguments.trim();
            let arguments = if raw.is_empty() {
                json!({})
            } else {
                serde_json::from_str(raw).map_err(|e| {
                    ProviderError::malformed(
                        self.id(),
                        format!("arguments for '{}' are not JSON: {e}", call.function.name),
                    )
                })?
            };
            return Ok(NormalizedReply::ToolCall {
                name: call.function.name,
                arguments,
            });
        }

        Ok(NormalizedReply::Text(message.content.unwrap_or_default()))
    }
}

#[async_trait]
impl ProviderAdapter for GroqAdapter {
    fn id(&self) -> &str {
        "groq"
    }

    fn name(&self) -> &str {
        "Groq"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn convert_tools(&self, catalog: &[ToolDescriptor]) -> Value {
        let tools: Vec<ChatTool> = catalog
            .iter()
            .map(|tool| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: clean_schema(&tool.input_schema),
                },
            })
            .collect();
        serde_json::to_value(tools).unwrap_or_default()
    }

    fn format_context(&self, messages: &[Message]) -> Value {
        let system = ChatMessage {
            role: "system".to_string(),
            content: Some(SYSTEM_PROMPT.to_string()),
            tool_calls: None,
            tool_call_id: None,
        };
        let messages: Vec<ChatMessage> = std::iter::once(system)
            .chain(trim_orphans(messages).iter().map(Self::convert_message))
            .collect();
        serde_json::to_value(messages).unwrap_or_default()
    }

    #[instrument(skip(self, context, tools), fields(model = %self.model))]
    async fn submit(&self, context: Value, tools: Value) -> Result<NormalizedReply, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(self.id()))?;

        let has_tools = tools.as_array().is_some_and(|t| !t.is_empty());
        let body = ChatRequest {
            model: self.model.clone(),
            messages: context,
            tool_choice: has_tools.then(|| "auto".to_string()),
            tools: has_tools.then_some(tools),
        };

        debug!("Sending request to Groq API");
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body);

        let response: ChatResponse = send_json(self.id(), request).await?;
        self.parse_response(response)
    }
}

// Chat completions API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    /// Null for assistant turns that only call a tool
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}
