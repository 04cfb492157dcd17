//! Provider registry with the active selection.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use hive_core::config::ProvidersConfig;
use hive_core::{ProviderCapability, ProviderError};

use super::anthropic::AnthropicAdapter;
use super::gemini::GeminiAdapter;
use super::groq::GroqAdapter;
use super::traits::ProviderAdapter;

/// Every known adapter, configured or not, plus which one is active.
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    active: RwLock<Option<String>>,
}

impl ProviderRegistry {
    /// Create a registry over `adapters`, preferring `preferred` as the
    /// initial selection when it is available.
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, preferred: Option<&str>) -> Self {
        let preferred_adapter = preferred.and_then(|id| {
            let found = adapters.iter().find(|a| a.id() == id && a.is_configured());
            if found.is_none() {
                warn!(provider = id, "Preferred provider is not available");
            }
            found
        });

        let active = preferred_adapter
            .or_else(|| adapters.iter().find(|a| a.is_configured()))
            .map(|a| a.id().to_string());

        match active {
            Some(ref id) => info!(provider = %id, "Active provider selected"),
            None => warn!("No model provider has credentials configured"),
        }

        Self {
            adapters,
            active: RwLock::new(active),
        }
    }

    /// Build every built-in adapter from configuration and environment.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(GeminiAdapter::from_config(config)),
            Arc::new(GroqAdapter::from_config(config)),
            Arc::new(AnthropicAdapter::from_config(config)),
        ];
        Self::new(adapters, config.preferred().as_deref())
    }

    /// Get an adapter by ID, configured or not.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.id() == id).cloned()
    }

    /// The active adapter.
    pub fn active(&self) -> Option<Arc<dyn ProviderAdapter>> {
        let active = self.active.read();
        active.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Make `id` the active provider.
    ///
    /// Fails with `UnknownProvider` or `NotConfigured`; the previous
    /// selection then stays in place.
    pub fn switch(&self, id: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let adapter = self
            .get(id)
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))?;
        if !adapter.is_configured() {
            return Err(ProviderError::not_configured(id));
        }

        let previous = self.active.write().replace(id.to_string());
        info!(from = ?previous, to = id, "Switched provider");
        Ok(adapter)
    }

    /// Availability of every known provider.
    pub fn capabilities(&self) -> Vec<ProviderCapability> {
        let active = self.active_id();
        self.adapters
            .iter()
            .map(|a| ProviderCapability {
                name: a.id().to_string(),
                available: a.is_configured(),
                active: active.as_deref() == Some(a.id()),
            })
            .collect()
    }

    /// Iterate over all known adapters.
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(preferred: Option<&str>) -> ProviderRegistry {
        ProviderRegistry::new(
            vec![
                Arc::new(GeminiAdapter::new(None)),
                Arc::new(GroqAdapter::new(Some("groq-key".into()))),
                Arc::new(AnthropicAdapter::new(Some("anthropic-key".into()))),
            ],
            preferred,
        )
    }

    #[test]
    fn test_initial_selection() {
        assert_eq!(registry(None).active_id().as_deref(), Some("groq"));
        assert_eq!(registry(Some("anthropic")).active_id().as_deref(), Some("anthropic"));
        // Unavailable preference falls back to the first configured adapter
        assert_eq!(registry(Some("gemini")).active_id().as_deref(), Some("groq"));
        assert_eq!(registry(Some("mistral")).active_id().as_deref(), Some("groq"));

        let empty = ProviderRegistry::new(vec![Arc::new(GeminiAdapter::new(None))], None);
        assert!(empty.active().is_none());
    }

    #[test]
    fn test_switch_keeps_previous_on_error() {
        let registry = registry(Some("groq"));

        let err = registry.switch("gemini").err().unwrap();
        assert!(err.is_auth());
        assert_eq!(registry.active_id().as_deref(), Some("groq"));

        let err = registry.switch("mistral").err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
        assert_eq!(registry.active_id().as_deref(), Some("groq"));

        let adapter = registry.switch("anthropic").unwrap();
        assert_eq!(adapter.id(), "anthropic");
        assert_eq!(registry.active().unwrap().id(), "anthropic");
    }

    #[test]
    fn test_capabilities() {
        let capabilities = registry(Some("anthropic")).capabilities();
        assert_eq!(capabilities.len(), 3);
        assert_eq!(
            capabilities[0],
            ProviderCapability {
                name: "gemini".into(),
                available: false,
                active: false
            }
        );
        assert!(capabilities[2].available && capabilities[2].active);
        assert_eq!(capabilities.iter().filter(|c| c.active).count(), 1);
    }
}
