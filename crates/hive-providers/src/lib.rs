//! # hive-providers
//!
//! Model provider adapters for Hive.
//!
//! This crate provides:
//! - The `ProviderAdapter` trait and the normalised reply type
//! - Adapters for Google Gemini, Groq and Anthropic
//! - Tool schema cleanup shared by every adapter
//! - A registry holding the active provider

pub mod anthropic;
pub mod gemini;
pub mod groq;
mod http;
pub mod registry;
pub mod schema;
pub mod traits;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use groq::GroqAdapter;
pub use registry::ProviderRegistry;
pub use schema::clean_schema;
pub use traits::{trim_orphans, NormalizedReply, ProviderAdapter};
