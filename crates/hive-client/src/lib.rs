//! # hive-client
//!
//! The orchestrating client for Hive.
//!
//! A query appends the user message, asks the active provider, runs any tool
//! the model requests through the session registry, and repeats until the
//! model answers with text or the tool loop bound is hit.

pub mod client;
pub mod error;
pub mod events;

pub use client::{Client, ClientConfig, ConnectReport};
pub use error::{format_client_error, ClientError};
pub use events::{NoOpHandler, QueryEventHandler};

pub use tokio_util::sync::CancellationToken;
