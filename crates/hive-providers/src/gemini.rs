//! Google Gemini adapter (`generateContent` REST API).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use hive_core::config::ProvidersConfig;
use hive_core::{Message, MessageContent, ProviderError, Role, ToolDescriptor};

use crate::http::send_json;
use crate::schema::{clean_schema, has_properties};
use crate::traits::{trim_orphans, NormalizedReply, ProviderAdapter};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";
const MODEL_ENV: &str = "GEMINI_MODEL";

pub struct GeminiAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GEMINI_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Build from the `[providers.gemini]` section and environment fallbacks.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let section = config.get("gemini");
        let mut adapter = Self::new(config.api_key("gemini"));
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

    fn convert_message(message: &Message) -> GeminiContent {
        let role = match message.role {
            Role::Model => "model",
            // Function responses travel in user turns
            Role::User | Role::ToolResult => "user",
        };

        let part = match &message.content {
            MessageContent::Text { text } => json!({ "text": text }),
            MessageContent::ToolCall { name, arguments } => json!({
                "functionCall": { "name": name, "args": arguments }
            }),
            MessageContent::ToolResult { name, output, .. } => {
                // The response field must be an object
                let response = if output.is_object() {
                    output.clone()
                } else {
                    json!({ "result": output })
                };
                json!({ "functionResponse": { "name": name, "response": response } })
            }
        };

        GeminiContent {
            role: role.to_string(),
            parts: vec![part],
        }
    }

    fn parse_response(&self, response: GeminiResponse) -> Result<NormalizedReply, ProviderError> {
        if response.candidates.is_empty() {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(ProviderError::malformed(self.id(), reason));
        }

        let parts = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts);

        let mut text = Vec::new();
        for part in parts {
            if let Some(call) = part.function_call {
                return Ok(NormalizedReply::ToolCall {
                    name: call.name,
                    arguments: call.args.unwrap_or_else(|| json!({})),
                });
            }
            if let Some(t) = part.text.filter(|t| !t.trim().is_empty()) {
                text.push(t);
            }
        }

        Ok(NormalizedReply::Text(text.join("")))
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> &str {
        "gemini"
    }

    fn name(&self) -> &str {
        "Google Gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn convert_tools(&self, catalog: &[ToolDescriptor]) -> Value {
        if catalog.is_empty() {
            return json!([]);
        }

        let declarations: Vec<Value> = catalog
            .iter()
            .map(|tool| {
                let parameters = clean_schema(&tool.input_schema);
                let mut declaration = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                // Gemini rejects object schemas without properties
                if has_properties(&parameters) {
                    declaration["parameters"] = parameters;
                }
                declaration
            })
            .collect();

        json!([{ "functionDeclarations": declarations }])
    }

    fn format_context(&self, messages: &[Message]) -> Value {
        let contents: Vec<GeminiContent> = trim_orphans(messages)
            .iter()
            .map(Self::convert_message)
            .collect();
        serde_json::to_value(contents).unwrap_or_default()
    }

    #[instrument(skip(self, context, tools), fields(model = %self.model))]
    async fn submit(&self, context: Value, tools: Value) -> Result<NormalizedReply, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(self.id()))?;

        let has_tools = tools.as_array().is_some_and(|t| !t.is_empty());
        let body = GeminiRequest {
            contents: context,
            tools: has_tools.then_some(tools),
        };

        debug!("Sending request to Gemini API");
        let request = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", api_key)
            .json(&body);

        let response: GeminiResponse = send_json(self.id(), request)
            .await
            .map_err(classify_key_error)?;
        self.parse_response(response)
    }
}

/// Gemini rejects a bad key with 400 `INVALID_ARGUMENT` rather than 401.
fn classify_key_error(error: ProviderError) -> ProviderError {
    match error {
        ProviderError::ApiError {
            provider,
            status: 400,
            message,
        } if message.contains("API key not valid") || message.contains("API_KEY_INVALID") => {
            ProviderError::AuthenticationFailed { provider, message }
        }
        other => other,
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
