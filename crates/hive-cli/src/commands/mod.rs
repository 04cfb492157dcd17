//! CLI command implementations.

pub mod ask;
pub mod config;
pub mod conversation;
pub mod doctor;
pub mod provider;
pub mod server;
