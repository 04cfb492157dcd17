//! # hive-store
//!
//! Conversation tree persistence for Hive.
//!
//! Messages form a tree per conversation: every message except the root
//! has a parent in the same conversation. Backends store the tree and
//! reconstruct the linear context leading to any message.

pub mod memory;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use hive_core::config::StorageConfig;
use hive_core::StorageBackend;

pub use memory::MemoryConversationStore;
pub use sqlite::SqliteConversationStore;
pub use store::{select_context, ConversationStore, Result, StoreError};

/// Open the backend selected by the storage configuration.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn ConversationStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryConversationStore::new())),
        StorageBackend::Sqlite => Ok(Arc::new(SqliteConversationStore::new(
            config.database_path(),
        )?)),
    }
}
