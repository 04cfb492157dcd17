//! Configuration system for Hive.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{default_key_env, Error};
use crate::tool::{ServerDescriptor, TransportKind};

/// Providers Hive knows how to talk to.
pub const KNOWN_PROVIDERS: &[&str] = &["gemini", "groq", "anthropic"];

/// Main configuration struct for Hive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resource limits
    pub limits: LimitsConfig,
    /// Conversation storage
    pub storage: StorageConfig,
    /// Provider configurations
    pub providers: ProvidersConfig,
    /// Tool servers keyed by name
    pub servers: BTreeMap<String, ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Token budget for the context handed to a provider
    pub max_context_tokens: u32,
    /// Tool calls allowed while answering one query
    pub max_tool_iterations: usize,
    /// Upper bound on a single tool call
    pub tool_call_timeout_secs: u64,
    /// Upper bound on closing one server during shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8000,
            max_tool_iterations: 10,
            tool_call_timeout_secs: 60,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Where conversations live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Ephemeral, lost on exit
    #[default]
    Memory,
    /// SQLite database on disk
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file; defaults to the data directory
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Database file to open for the SQLite backend.
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("conversations.db"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider selected at startup
    pub default_provider: Option<String>,
    /// Google Gemini configuration
    pub gemini: Option<ProviderConfig>,
    /// Groq configuration
    pub groq: Option<ProviderConfig>,
    /// Anthropic configuration
    pub anthropic: Option<ProviderConfig>,
}

impl ProvidersConfig {
    /// Look up the section for a provider by name.
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "gemini" => self.gemini.as_ref(),
            "groq" => self.groq.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            _ => None,
        }
    }

    /// Provider to select at startup: config first, then `DEFAULT_LLM_PROVIDER`.
    pub fn preferred(&self) -> Option<String> {
        self.default_provider
            .clone()
            .or_else(|| std::env::var("DEFAULT_LLM_PROVIDER").ok())
            .filter(|p| !p.is_empty())
    }

    /// Resolve the API key for a provider from config, then its environment variable.
    pub fn api_key(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(section) => section.resolve_api_key(default_key_env(name)),
            None => default_key_env(name).and_then(|var| non_empty_env(var)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for API key
    pub api_key_env: Option<String>,
    /// Model to request
    pub model: Option<String>,
    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key from the direct value, the named variable, or the fallback variable.
    pub fn resolve_api_key(&self, fallback_env: Option<&str>) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        if let Some(ref env_var) = self.api_key_env {
            if let Some(key) = non_empty_env(env_var) {
                return Some(key);
            }
        }
        fallback_env.and_then(non_empty_env)
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// A tool server entry as written in the config file.
///
/// `type = "sse"` needs a `url`; anything else is a subprocess and needs a `command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub url: Option<String>,
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kind: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            enabled: true,
        }
    }
}

impl ServerConfig {
    /// Convert into a validated connection descriptor.
    pub fn to_descriptor(&self, name: &str) -> Result<ServerDescriptor, Error> {
        let transport = match self.kind.as_deref() {
            Some("sse") => {
                let url = self.url.as_ref().filter(|u| !u.is_empty()).ok_or_else(|| {
                    Error::Config(format!("server '{}': sse transport requires 'url'", name))
                })?;
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(Error::Config(format!(
                        "server '{}': url must start with http:// or https://",
                        name
                    )));
                }
                TransportKind::Sse { url: url.clone() }
            }
            None | Some("stdio") => {
                let command = self.command.as_ref().filter(|c| !c.is_empty()).ok_or_else(|| {
                    Error::Config(format!("server '{}': stdio transport requires 'command'", name))
                })?;
                TransportKind::Stdio {
                    command: command.clone(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                }
            }
            Some(other) => {
                return Err(Error::Config(format!(
                    "server '{}': unsupported transport type '{}'",
                    name, other
                )))
            }
        };

        Ok(ServerDescriptor {
            name: name.to_string(),
            transport,
        })
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "limits.max_context_tokens")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Layered figment: defaults, user file, project files, then `HIVE_` variables.
    pub fn figment(extra: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".hive/config.toml"))
            .merge(Toml::file(".hive/config.local.toml"));

        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }

        // Nested keys use a double underscore: HIVE_LIMITS__MAX_CONTEXT_TOKENS
        figment.merge(Env::prefixed("HIVE_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Load configuration, layering an explicit file on top of the defaults.
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(Some(path)).extract()
    }

    /// Load and validate configuration.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let config: Config = Self::figment(path)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.limits.max_context_tokens == 0 {
            result.add_error(
                "limits.max_context_tokens",
                "max_context_tokens must be greater than 0",
            );
        }
        if self.limits.max_context_tokens > 1_000_000 {
            result.add_warning(
                "limits.max_context_tokens",
                "max_context_tokens is very high (> 1M), most models will reject it",
            );
        }
        if self.limits.max_tool_iterations == 0 {
            result.add_error(
                "limits.max_tool_iterations",
                "max_tool_iterations must be greater than 0",
            );
        }
        if self.limits.max_tool_iterations > 100 {
            result.add_warning(
                "limits.max_tool_iterations",
                "max_tool_iterations is very high (> 100)",
            );
        }
        if self.limits.tool_call_timeout_secs == 0 {
            result.add_error(
                "limits.tool_call_timeout_secs",
                "tool_call_timeout_secs must be greater than 0",
            );
        }

        if let Some(ref default) = self.providers.default_provider {
            if !KNOWN_PROVIDERS.contains(&default.as_str()) {
                result.add_warning(
                    "providers.default_provider",
                    format!(
                        "Unknown provider '{}'. Valid values: {:?}",
                        default, KNOWN_PROVIDERS
                    ),
                );
            }
        }

        for name in KNOWN_PROVIDERS {
            let Some(section) = self.providers.get(name) else {
                continue;
            };
            if section.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
                result.add_warning(format!("providers.{}.api_key", name), "API key is empty string");
            }
            if let Some(ref base_url) = section.base_url {
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    result.add_error(
                        format!("providers.{}.base_url", name),
                        "base_url must start with http:// or https://",
                    );
                }
            }
        }

        for (name, server) in &self.servers {
            if let Err(e) = server.to_descriptor(name) {
                result.add_error(format!("servers.{}", name), e.to_string());
            }
        }

        result
    }

    /// Descriptors for every enabled server entry.
    pub fn server_descriptors(&self) -> Result<Vec<ServerDescriptor>, Error> {
        self.servers
            .iter()
            .filter(|(_, server)| server.enabled)
            .map(|(name, server)| server.to_descriptor(name))
            .collect()
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("hive"))
            .unwrap_or_else(|| PathBuf::from("~/.config/hive"))
    }

    /// Get the data directory (for conversations, history).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("hive"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/hive"))
    }
}
