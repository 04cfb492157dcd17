//! The orchestrating client: one query loop over providers, tools and storage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use hive_core::config::LimitsConfig;
use hive_core::{
    Config, Conversation, ConversationId, Message, NewMessage, ProviderCapability,
    ServerDescriptor, ToolDescriptor,
};
use hive_mcp::{McpError, ServerStatus, SessionOptions, SessionRegistry, Transport};
use hive_providers::{NormalizedReply, ProviderAdapter, ProviderRegistry};
use hive_store::ConversationStore;

use crate::error::ClientError;
use crate::events::{NoOpHandler, QueryEventHandler};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Bounds applied to every query.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Token budget for the context handed to a provider
    pub max_context_tokens: u32,
    /// Tool calls allowed while answering one query
    pub max_tool_iterations: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for ClientConfig {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_context_tokens: limits.max_context_tokens,
            max_tool_iterations: limits.max_tool_iterations,
        }
    }
}

/// Outcome of [`Client::connect_servers`].
#[derive(Debug, Default)]
pub struct ConnectReport {
    /// Registered servers with their tool counts
    pub connected: Vec<(String, usize)>,
    pub failed: Vec<(String, McpError)>,
}

/// Front-end surface over conversation storage, model providers and tool servers.
pub struct Client {
    store: Arc<dyn ConversationStore>,
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionRegistry>,
    config: ClientConfig,
    events: Arc<dyn QueryEventHandler>,
}

impl Client {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        providers: Arc<ProviderRegistry>,
        sessions: Arc<SessionRegistry>,
        config: ClientConfig,
    ) -> Self {
        Self {
            store,
            providers,
            sessions,
            config,
            events: Arc::new(NoOpHandler),
        }
    }

    /// Build everything from configuration. Servers are not connected yet;
    /// see [`Client::connect_servers`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = hive_store::open(&config.storage)?;
        let providers = Arc::new(ProviderRegistry::from_config(&config.providers));
        let sessions = Arc::new(
            SessionRegistry::new(SessionOptions::from(&config.limits))
                .with_shutdown_timeout(Duration::from_secs(config.limits.shutdown_timeout_secs)),
        );
        Ok(Self::new(store, providers, sessions, ClientConfig::from(&config.limits)))
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn QueryEventHandler>) -> Self {
        self.events = handler;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Answer `text`, continuing `conversation` or starting a new one.
    ///
    /// Returns the terminal model message.
    pub async fn submit_query(
        &self,
        conversation: Option<ConversationId>,
        text: &str,
    ) -> Result<Message> {
        self.submit_query_with_cancel(conversation, text, &CancellationToken::new())
            .await
    }

    /// Like [`Client::submit_query`], abandoning the query once `cancel` fires.
    ///
    /// An in-flight tool call is dropped, which notifies its server; the
    /// session itself stays open. The abandoned call is answered with an
    /// error result so the conversation stays well formed.
    #[instrument(skip(self, text, cancel), fields(conversation = ?conversation))]
    pub async fn submit_query_with_cancel(
        &self,
        conversation: Option<ConversationId>,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        // A concurrent switch affects the next query, not this one
        let adapter = self.providers.active().ok_or(ClientError::NoActiveProvider)?;

        let conversation = match conversation {
            Some(id) => self.store.get_conversation(id).await?.id,
            None => self.store.new_conversation(None).await?.id,
        };

        let parent = self.store.latest_message(conversation).await?.map(|m| m.id);
        let mut leaf = self
            .store
            .append(NewMessage::user(conversation, parent, text))
            .await?;

        let limit = self.config.max_tool_iterations;
        let mut tool_calls = 0usize;

        loop {
            let context = self
                .store
                .context_for(leaf.id, self.config.max_context_tokens)
                .await?;
            let catalog = self.sessions.list_tools().await;

            self.events.on_thinking(adapter.id());
            debug!(provider = adapter.id(), messages = context.len(), tools = catalog.len(), "Asking model");
            let reply = cancellable(cancel, adapter.respond(&context, &catalog)).await??;

            let (name, arguments) = match reply {
                NormalizedReply::Text(text) => {
                    let message = self
                        .store
                        .append(
                            NewMessage::model_text(conversation, leaf.id, text)
                                .with_provider(adapter.id()),
                        )
                        .await?;
                    self.events.on_reply(&message);
                    info!(conversation = %conversation, tool_calls, "Query answered");
                    return Ok(message);
                }
                NormalizedReply::ToolCall { name, arguments } => (name, arguments),
            };

            if tool_calls >= limit {
                warn!(conversation = %conversation, limit, tool = %name, "Tool loop bound reached");
                return Err(ClientError::ToolLoopExceeded { limit });
            }
            tool_calls += 1;

            let call = self
                .store
                .append(
                    NewMessage::tool_call(conversation, leaf.id, &name, arguments.clone())
                        .with_provider(adapter.id()),
                )
                .await?;

            self.events.on_tool_start(&name, &arguments);
            let (output, is_error, cancelled) = match self.run_tool(&name, arguments, cancel).await {
                Ok((output, is_error)) => (output, is_error, false),
                Err(ClientError::Cancelled) => (json!({ "error": "cancelled" }), true, true),
                Err(e) => return Err(e),
            };
            self.events.on_tool_complete(&name, &output, is_error);

            // Every stored call gets a result, even an abandoned one
            leaf = self
                .store
                .append(NewMessage::tool_result(conversation, call.id, &name, output, is_error))
                .await?;

            if cancelled {
                info!(conversation = %conversation, tool = %name, "Query cancelled during tool call");
                return Err(ClientError::Cancelled);
            }
        }
    }

    /// Dispatch one tool call and shape its outcome for storage.
    ///
    /// Failures of the call itself become error results for the model to
    /// see; only cancellation aborts the query.
    async fn run_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<(Value, bool)> {
        match cancellable(cancel, self.sessions.dispatch(name, arguments)).await? {
            Ok(result) => Ok((json!({ "result": result.content_json() }), result.is_error)),
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                Ok((json!({ "error": e.to_string() }), true))
            }
        }
    }

    pub async fn new_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        Ok(self.store.new_conversation(title).await?)
    }

    pub async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        Ok(self.store.list_conversations(limit).await?)
    }

    /// The merged tool catalog.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.sessions.list_tools().await
    }

    pub fn list_providers(&self) -> Vec<ProviderCapability> {
        self.providers.capabilities()
    }

    pub fn active_provider(&self) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.active()
    }

    /// Select the provider for subsequent queries.
    pub fn switch_provider(&self, name: &str) -> Result<()> {
        self.providers.switch(name)?;
        Ok(())
    }

    pub async fn register_server(&self, descriptor: &ServerDescriptor) -> Result<Vec<ToolDescriptor>> {
        Ok(self.sessions.register(descriptor).await?)
    }

    /// Register a server reached through a caller-built transport.
    pub async fn register_transport(
        &self,
        name: &str,
        transport: Box<dyn Transport>,
    ) -> Result<Vec<ToolDescriptor>> {
        Ok(self.sessions.register_transport(name, transport).await?)
    }

    pub async fn unregister_server(&self, name: &str) -> Result<()> {
        Ok(self.sessions.unregister(name).await?)
    }

    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        self.sessions.list_servers().await
    }

    /// Register several servers; a failing one is logged and skipped.
    pub async fn connect_servers(&self, descriptors: &[ServerDescriptor]) -> ConnectReport {
        let mut report = ConnectReport::default();
        for descriptor in descriptors {
            match self.sessions.register(descriptor).await {
                Ok(tools) => report.connected.push((descriptor.name.clone(), tools.len())),
                Err(e) => {
                    warn!(server = %descriptor.name, error = %e, "Failed to connect server");
                    report.failed.push((descriptor.name.clone(), e));
                }
            }
        }
        report
    }

    /// Close every server session.
    pub async fn shutdown(&self) {
        self.sessions.shutdown_all().await;
    }
}

/// Race `future` against `cancel`, dropping the future when cancellation wins.
async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        output = future => Ok(output),
    }
}
