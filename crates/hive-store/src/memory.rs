//! In-process conversation store. Nothing survives the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use hive_core::{Conversation, ConversationId, Message, MessageId, NewMessage};

use crate::store::{check_well_formed, ConversationLocks, ConversationStore, Result, StoreError};

/// One conversation's messages, in insertion order.
struct Arena {
    conversation: Conversation,
    messages: Vec<Message>,
    /// Message id to position in `messages`
    index: HashMap<MessageId, usize>,
}

impl Arena {
    fn get(&self, id: MessageId) -> Option<&Message> {
        self.index.get(&id).map(|&i| &self.messages[i])
    }
}

#[derive(Default)]
struct State {
    arenas: BTreeMap<ConversationId, Arena>,
    /// Which conversation owns each message
    owners: HashMap<MessageId, ConversationId>,
}

impl State {
    fn arena(&self, id: ConversationId) -> Result<&Arena> {
        self.arenas
            .get(&id)
            .ok_or(StoreError::UnknownConversation(id))
    }

    fn message(&self, id: MessageId) -> Option<&Message> {
        let owner = self.owners.get(&id)?;
        self.arenas.get(owner)?.get(id)
    }
}

/// Conversation store backed by process memory.
pub struct MemoryConversationStore {
    state: RwLock<State>,
    next_conversation: AtomicI64,
    next_message: AtomicI64,
    locks: ConversationLocks,
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_conversation: AtomicI64::new(1),
            next_message: AtomicI64::new(1),
            locks: ConversationLocks::default(),
        }
    }
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn new_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        let now = Utc::now();
        let id = ConversationId(self.next_conversation.fetch_add(1, Ordering::SeqCst));
        let conversation = Conversation {
            id,
            title: title
                .map(str::to_string)
                .unwrap_or_else(|| Conversation::default_title(now)),
            created_at: now,
            last_updated: now,
        };

        self.state.write().arenas.insert(
            id,
            Arena {
                conversation: conversation.clone(),
                messages: Vec::new(),
                index: HashMap::new(),
            },
        );
        debug!(conversation = %id, "Created conversation");
        Ok(conversation)
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        Ok(self.state.read().arena(id)?.conversation.clone())
    }

    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .state
            .read()
            .arenas
            .values()
            .map(|arena| arena.conversation.clone())
            .collect();
        conversations.sort_by(|a, b| (b.last_updated, b.id).cmp(&(a.last_updated, a.id)));
        conversations.truncate(limit);
        Ok(conversations)
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        {
            let mut state = self.state.write();
            let arena = state
                .arenas
                .remove(&id)
                .ok_or(StoreError::UnknownConversation(id))?;
            for message in &arena.messages {
                state.owners.remove(&message.id);
            }
        }
        self.locks.forget(id);
        Ok(())
    }

    async fn append(&self, message: NewMessage) -> Result<Message> {
        check_well_formed(&message)?;
        let conversation = message.conversation_id;
        let _guard = self.locks.lock(conversation).await;

        let mut state = self.state.write();
        let arena = state.arena(conversation)?;
        match message.parent_id {
            Some(parent) if arena.get(parent).is_none() => {
                return Err(if state.owners.contains_key(&parent) {
                    StoreError::ParentInOtherConversation {
                        parent,
                        conversation,
                    }
                } else {
                    StoreError::UnknownParent(parent)
                });
            }
            None if !arena.messages.is_empty() => {
                return Err(StoreError::DuplicateRoot(conversation));
            }
            _ => {}
        }

        let now = Utc::now();
        let id = MessageId(self.next_message.fetch_add(1, Ordering::SeqCst));
        let stored = message.into_message(id, now);

        state.owners.insert(id, conversation);
        let arena = state
            .arenas
            .get_mut(&conversation)
            .ok_or(StoreError::UnknownConversation(conversation))?;
        arena.index.insert(id, arena.messages.len());
        arena.messages.push(stored.clone());
        arena.conversation.last_updated = now;

        debug!(conversation = %conversation, message = %id, role = %stored.role, "Appended message");
        Ok(stored)
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.state
            .read()
            .message(id)
            .cloned()
            .ok_or(StoreError::UnknownMessage(id))
    }

    async fn conversation_messages(&self, id: ConversationId) -> Result<Vec<Message>> {
        Ok(self.state.read().arena(id)?.messages.clone())
    }

    async fn latest_message(&self, id: ConversationId) -> Result<Option<Message>> {
        Ok(self.state.read().arena(id)?.messages.last().cloned())
    }

    async fn path_to(&self, leaf: MessageId) -> Result<Vec<Message>> {
        let state = self.state.read();
        let mut current = state.message(leaf).ok_or(StoreError::UnknownMessage(leaf))?;
        let arena = state.arena(current.conversation_id)?;

        let mut path = vec![current.clone()];
        while let Some(parent) = current.parent_id {
            let child = current.id;
            current = arena.get(parent).ok_or_else(|| {
                StoreError::Corrupt(format!("message {child} has a dangling parent {parent}"))
            })?;
            path.push(current.clone());
        }
        path.reverse();
        Ok(path)
    }
}
