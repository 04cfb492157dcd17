//! # hive-core
//!
//! Core types and abstractions shared by every Hive crate.
//!
//! This crate provides:
//! - Conversation tree primitives (messages, conversations, token estimates)
//! - Tool, server and provider descriptors
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod tool;

pub use config::{Config, StorageBackend};
pub use error::{Error, ProviderError, Result};
pub use message::{
    estimate_tokens, Conversation, ConversationId, Message, MessageContent, MessageId,
    MessageKind, NewMessage, Role,
};
pub use tool::{ProviderCapability, ServerDescriptor, ToolDescriptor, TransportKind};
