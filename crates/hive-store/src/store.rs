//! The conversation store contract shared by every backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use hive_core::{Conversation, ConversationId, Message, MessageId, MessageKind, NewMessage, Role};

/// Errors that can occur during conversation storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parent message not found: {0}")]
    UnknownParent(MessageId),

    #[error("Message not found: {0}")]
    UnknownMessage(MessageId),

    #[error("Conversation not found: {0}")]
    UnknownConversation(ConversationId),

    #[error("Parent message {parent} belongs to another conversation than {conversation}")]
    ParentInOtherConversation {
        parent: MessageId,
        conversation: ConversationId,
    },

    #[error("Conversation {0} already has a root message")]
    DuplicateRoot(ConversationId),

    #[error("A {role} message cannot carry {kind} content")]
    InvalidMessage { role: Role, kind: MessageKind },

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for conversation trees.
///
/// Writes to one conversation are serialised; different conversations
/// proceed independently.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Start a conversation. Without a title, a timestamped default is used.
    async fn new_conversation(&self, title: Option<&str>) -> Result<Conversation>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation>;

    /// Conversations, most recently updated first.
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>>;

    /// Administrative removal of a conversation and all its messages.
    async fn delete_conversation(&self, id: ConversationId) -> Result<()>;

    /// Store a message and bump the conversation's `last_updated`.
    async fn append(&self, message: NewMessage) -> Result<Message>;

    async fn get_message(&self, id: MessageId) -> Result<Message>;

    /// Every message of a conversation, in insertion order.
    async fn conversation_messages(&self, id: ConversationId) -> Result<Vec<Message>>;

    /// The most recently appended message of a conversation.
    async fn latest_message(&self, id: ConversationId) -> Result<Option<Message>>;

    /// Full path from the root to `leaf`, root first.
    async fn path_to(&self, leaf: MessageId) -> Result<Vec<Message>>;

    /// Linear context ending at `leaf`, trimmed to fit `max_tokens`.
    async fn context_for(&self, leaf: MessageId, max_tokens: u32) -> Result<Vec<Message>> {
        let path = self.path_to(leaf).await?;
        Ok(select_context(path, max_tokens))
    }

    /// Cumulative token count from the root to `leaf`.
    async fn path_cost(&self, leaf: MessageId) -> Result<u64> {
        let path = self.path_to(leaf).await?;
        Ok(path.iter().map(|m| u64::from(m.token_count)).sum())
    }
}

/// Trim a root-to-leaf path to a token budget.
///
/// Walking back from the leaf, messages are kept while the running total
/// stays within `max_tokens`; the first one that does not fit ends the walk.
/// The leaf is kept even when it alone exceeds the budget.
pub fn select_context(path: Vec<Message>, max_tokens: u32) -> Vec<Message> {
    let budget = u64::from(max_tokens);
    let mut total = 0u64;
    let mut kept = Vec::with_capacity(path.len());

    for (i, message) in path.into_iter().rev().enumerate() {
        let cost = u64::from(message.token_count);
        if i > 0 && total + cost > budget {
            break;
        }
        total += cost;
        kept.push(message);
    }

    kept.reverse();
    kept
}

/// Reject messages whose role cannot carry their payload.
pub(crate) fn check_well_formed(message: &NewMessage) -> Result<()> {
    if message.is_well_formed() {
        Ok(())
    } else {
        Err(StoreError::InvalidMessage {
            role: message.role,
            kind: message.kind(),
        })
    }
}

/// One async mutex per conversation, created on demand.
#[derive(Default)]
pub(crate) struct ConversationLocks {
    locks: parking_lot::Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLocks {
    pub(crate) async fn lock(&self, id: ConversationId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        lock.lock_owned().await
    }

    pub(crate) fn forget(&self, id: ConversationId) {
        self.locks.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hive_core::MessageContent;

    fn node(id: i64, tokens: u32) -> Message {
        let mut message = NewMessage::new(
            ConversationId(1),
            (id > 1).then(|| MessageId(id - 1)),
            Role::User,
            MessageContent::text("x"),
        )
        .into_message(MessageId(id), Utc::now());
        message.token_count = tokens;
        message
    }

    fn ids(messages: &[Message]) -> Vec<i64> {
        messages.iter().map(|m| m.id.0).collect()
    }

    #[test]
    fn test_select_context_keeps_recent_suffix() {
        let path = vec![node(1, 5), node(2, 5), node(3, 5), node(4, 5)];
        assert_eq!(ids(&select_context(path.clone(), 100)), vec![1, 2, 3, 4]);
        assert_eq!(ids(&select_context(path.clone(), 10)), vec![3, 4]);
        assert_eq!(ids(&select_context(path, 14)), vec![3, 4]);
    }

    #[test]
    fn test_select_context_stops_at_first_misfit() {
        // The 50-token node does not fit, so the cheap root is not reached either
        let path = vec![node(1, 1), node(2, 50), node(3, 5)];
        assert_eq!(ids(&select_context(path, 20)), vec![3]);
    }

    #[test]
    fn test_select_context_always_keeps_leaf() {
        let path = vec![node(1, 5), node(2, 500)];
        assert_eq!(ids(&select_context(path, 10)), vec![2]);
        assert_eq!(ids(&select_context(vec![node(1, 3)], 0)), vec![1]);
    }

    #[test]
    fn test_select_context_budget_is_inclusive() {
        let path = vec![node(1, 5), node(2, 5)];
        assert_eq!(ids(&select_context(path, 10)), vec![1, 2]);
    }
}
