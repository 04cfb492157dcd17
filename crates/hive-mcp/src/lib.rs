//! # hive-mcp
//!
//! Tool server integration for Hive.
//!
//! This crate provides:
//! - JSON-RPC protocol types
//! - stdio, event-stream and in-memory transports
//! - Server sessions with handshake, tool discovery and tool calls
//! - A registry that merges every server's tools into one namespace
//! - In-process servers backed by Rust handlers

pub mod error;
pub mod local;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sse;
pub mod transport;

pub use error::{McpError, ToolCallError, TransportError};
pub use local::{LocalServer, LocalServerHandle};
pub use protocol::{CallToolResult, ToolContent};
pub use registry::{ServerStatus, SessionRegistry};
pub use session::{ServerSession, SessionOptions, SessionState};
pub use transport::{MemoryPeer, MemoryTransport, SseTransport, StdioTransport, Transport};
