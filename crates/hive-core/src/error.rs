//! Error types shared across Hive.
//!
//! Each layer owns its own error enum; this module holds the ones that more
//! than one crate needs to name, plus the helpers used to render errors
//! with a recovery hint.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the shared [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for configuration and cross-cutting failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/hive/config.toml"),
            Error::Provider(e) => e.recovery_suggestion(),
            _ => None,
        }
    }
}

/// Failures raised by model provider adapters.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No provider with this name is known
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    /// Credentials are missing
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// Credentials were rejected
    #[error("Authentication failed for {provider}: {message}")]
    AuthenticationFailed { provider: String, message: String },

    /// Vendor asked us to slow down
    #[error("Rate limited by {provider}{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// Vendor reply could not be understood
    #[error("Malformed reply from {provider}: {message}")]
    MalformedReply { provider: String, message: String },

    /// Any other non-success HTTP status
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },
}

impl ProviderError {
    /// Credential problems: missing or rejected. Never worth retrying.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ProviderError::NotConfigured { .. } | ProviderError::AuthenticationFailed { .. }
        )
    }

    /// Whether a caller may retry the same request after backing off.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::NetworkError { .. } => true,
            ProviderError::ApiError { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::UnknownProvider(_) => {
                Some("Use 'hive providers' to see available providers")
            }
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Set the API key environment variable"),
            ProviderError::NotConfigured { .. } => {
                Some("Configure the provider in ~/.config/hive/config.toml")
            }
            ProviderError::AuthenticationFailed { .. } => {
                Some("Check that your API key is valid and not expired")
            }
            ProviderError::RateLimited { .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            ProviderError::MalformedReply { .. } => {
                Some("Try again, or switch provider with 'use provider <name>'")
            }
            ProviderError::NetworkError { .. } => Some("Check your internet connection"),
            _ => None,
        }
    }

    /// Missing credential for `provider`, pointing at the usual env var.
    pub fn not_configured(provider: &str) -> Self {
        ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: default_key_env(provider).map(str::to_string),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let provider = provider.into();
        let message = message.into();
        match status {
            401 | 403 => ProviderError::AuthenticationFailed { provider, message },
            429 => ProviderError::RateLimited {
                provider,
                retry_after,
            },
            _ => ProviderError::ApiError {
                provider,
                status,
                message,
            },
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::MalformedReply {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Conventional API key variable for the built-in providers.
pub fn default_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" => Some("GEMINI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}
