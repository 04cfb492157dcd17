//! Tool catalog and server connection descriptors.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by a connected server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique across the merged catalog
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool arguments
    pub input_schema: Value,
    /// Name of the server that declared the tool
    pub server: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            server: server.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON over stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// HTTP event stream with a companion POST channel
    Sse { url: String },
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Stdio { .. } => "stdio",
            TransportKind::Sse { .. } => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio { command, args, .. } if args.is_empty() => {
                write!(f, "stdio: {}", command)
            }
            TransportKind::Stdio { command, args, .. } => {
                write!(f, "stdio: {} {}", command, args.join(" "))
            }
            TransportKind::Sse { url } => write!(f, "sse: {}", url),
        }
    }
}

/// A named server connection, already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportKind,
}

impl ServerDescriptor {
    /// Descriptor for a subprocess server.
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        }
    }

    /// Descriptor for an event-stream server.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Sse { url: url.into() },
        }
    }

    /// Add an environment variable for a subprocess server. No-op for SSE.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportKind::Stdio { ref mut env, .. } = self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }
}

/// Availability of one model provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapability {
    pub name: String,
    /// Credentials are present
    pub available: bool,
    /// Currently selected
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_descriptor_builders() {
        let desc = ServerDescriptor::stdio("calc", "python", vec!["calc.py".into()])
            .with_env("DEBUG", "1");
        assert_eq!(desc.transport.label(), "stdio");
        match &desc.transport {
            TransportKind::Stdio { env, .. } => assert_eq!(env.get("DEBUG"), Some(&"1".to_string())),
            other => panic!("unexpected transport {:?}", other),
        }

        let desc = ServerDescriptor::sse("remote", "http://localhost:8080/sse").with_env("X", "y");
        assert_eq!(desc.transport.to_string(), "sse: http://localhost:8080/sse");
    }

    #[test]
    fn test_transport_kind_serde() {
        let kind: TransportKind =
            serde_json::from_str(r#"{"type":"sse","url":"http://x/sse"}"#).unwrap();
        assert_eq!(kind, TransportKind::Sse { url: "http://x/sse".into() });

        let kind: TransportKind =
            serde_json::from_str(r#"{"type":"stdio","command":"npx"}"#).unwrap();
        assert!(matches!(kind, TransportKind::Stdio { ref args, .. } if args.is_empty()));
    }
}
