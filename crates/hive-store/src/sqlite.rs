//! SQLite-backed conversation store.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use hive_core::{
    Conversation, ConversationId, Message, MessageContent, MessageId, MessageKind, NewMessage,
    Role,
};

use crate::store::{check_well_formed, ConversationLocks, ConversationStore, Result, StoreError};

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.parent_id, m.role, m.kind, m.content, \
                               m.token_count, m.provider, m.created_at";

/// SQLite-based conversation store.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
    locks: ConversationLocks,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `path` and run migrations if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened conversation database");
        Ok(store)
    }

    /// A private database that lives as long as the store.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
            locks: ConversationLocks::default(),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        // The version table itself is created by the first migration
        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            debug!("Applying conversation schema v1");
            conn.execute_batch(include_str!("../migrations/001_initial.sql"))?;
        }

        Ok(())
    }

    /// Validate tree placement and insert, all within one transaction.
    fn insert(conn: &mut Connection, message: NewMessage) -> Result<Message> {
        let conversation = message.conversation_id;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            [conversation.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::UnknownConversation(conversation));
        }

        match message.parent_id {
            Some(parent) => {
                let owner: Option<i64> = tx
                    .query_row(
                        "SELECT conversation_id FROM messages WHERE id = ?1",
                        [parent.0],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => return Err(StoreError::UnknownParent(parent)),
                    Some(owner) if owner != conversation.0 => {
                        return Err(StoreError::ParentInOtherConversation {
                            parent,
                            conversation,
                        })
                    }
                    Some(_) => {}
                }
            }
            None => {
                let has_root: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM messages WHERE conversation_id = ?1 AND parent_id IS NULL)",
                    [conversation.0],
                    |row| row.get(0),
                )?;
                if has_root {
                    return Err(StoreError::DuplicateRoot(conversation));
                }
            }
        }

        let now = Utc::now();
        let created_at = format_datetime(&now);
        tx.execute(
            "INSERT INTO messages (conversation_id, parent_id, role, kind, content, token_count, provider, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.0,
                message.parent_id.map(|p| p.0),
                message.role.as_str(),
                message.kind().as_str(),
                serde_json::to_string(&message.content)?,
                message.content.estimate_tokens(),
                message.provider,
                created_at,
            ],
        )?;
        let id = MessageId(tx.last_insert_rowid());

        tx.execute(
            "UPDATE conversations SET last_updated = ?1 WHERE id = ?2",
            params![created_at, conversation.0],
        )?;
        tx.commit()?;

        Ok(message.into_message(id, now))
    }

    fn read_conversation(conn: &Connection, id: ConversationId) -> Result<Conversation> {
        conn.query_row(
            "SELECT id, title, created_at, last_updated FROM conversations WHERE id = ?1",
            [id.0],
            ConversationRow::read,
        )
        .optional()?
        .ok_or(StoreError::UnknownConversation(id))?
        .into_conversation()
    }

    fn query_messages(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, MessageRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn new_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        let now = Utc::now();
        let title = title
            .map(str::to_string)
            .unwrap_or_else(|| Conversation::default_title(now));
        let stamp = format_datetime(&now);

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (title, created_at, last_updated) VALUES (?1, ?2, ?2)",
            params![title, stamp],
        )?;
        let id = ConversationId(conn.last_insert_rowid());
        debug!(conversation = %id, "Created conversation");

        Ok(Conversation {
            id,
            title,
            created_at: now,
            last_updated: now,
        })
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        Self::read_conversation(&self.conn.lock(), id)
    }

    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, last_updated FROM conversations
             ORDER BY last_updated DESC, id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], ConversationRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ConversationRow::into_conversation).collect()
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM conversations WHERE id = ?1", [id.0])?;
        if deleted == 0 {
            return Err(StoreError::UnknownConversation(id));
        }
        self.locks.forget(id);
        Ok(())
    }

    async fn append(&self, message: NewMessage) -> Result<Message> {
        check_well_formed(&message)?;
        let _guard = self.locks.lock(message.conversation_id).await;
        let stored = Self::insert(&mut self.conn.lock(), message)?;
        debug!(
            conversation = %stored.conversation_id,
            message = %stored.id,
            role = %stored.role,
            "Appended message"
        );
        Ok(stored)
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
        Self::query_messages(&self.conn.lock(), &sql, [id.0])?
            .pop()
            .ok_or(StoreError::UnknownMessage(id))
    }

    async fn conversation_messages(&self, id: ConversationId) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        Self::read_conversation(&conn, id)?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.conversation_id = ?1 ORDER BY m.id"
        );
        Self::query_messages(&conn, &sql, [id.0])
    }

    async fn latest_message(&self, id: ConversationId) -> Result<Option<Message>> {
        let conn = self.conn.lock();
        Self::read_conversation(&conn, id)?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.conversation_id = ?1
             ORDER BY m.id DESC LIMIT 1"
        );
        Ok(Self::query_messages(&conn, &sql, [id.0])?.pop())
    }

    async fn path_to(&self, leaf: MessageId) -> Result<Vec<Message>> {
        let sql = format!(
            "WITH RECURSIVE path(id, depth) AS (
                 SELECT id, 0 FROM messages WHERE id = ?1
                 UNION ALL
                 SELECT m.parent_id, path.depth + 1
                 FROM messages m JOIN path ON m.id = path.id
                 WHERE m.parent_id IS NOT NULL
             )
             SELECT {MESSAGE_COLUMNS} FROM path JOIN messages m ON m.id = path.id
             ORDER BY path.depth DESC"
        );
        let path = Self::query_messages(&self.conn.lock(), &sql, [leaf.0])?;
        if path.is_empty() {
            return Err(StoreError::UnknownMessage(leaf));
        }
        Ok(path)
    }
}

/// Raw column values of a `messages` row.
struct MessageRow {
    id: i64,
    conversation_id: i64,
    parent_id: Option<i64>,
    role: String,
    kind: String,
    content: String,
    token_count: u32,
    provider: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            parent_id: row.get(2)?,
            role: row.get(3)?,
            kind: row.get(4)?,
            content: row.get(5)?,
            token_count: row.get(6)?,
            provider: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            StoreError::Corrupt(format!("message {} has unknown role '{}'", self.id, self.role))
        })?;
        let kind = MessageKind::parse(&self.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("message {} has unknown kind '{}'", self.id, self.kind))
        })?;
        let content: MessageContent = serde_json::from_str(&self.content)?;
        if content.kind() != kind {
            return Err(StoreError::Corrupt(format!(
                "message {} is marked {} but holds {}",
                self.id,
                kind,
                content.kind()
            )));
        }

        Ok(Message {
            id: MessageId(self.id),
            parent_id: self.parent_id.map(MessageId),
            conversation_id: ConversationId(self.conversation_id),
            role,
            kind,
            content,
            provider: self.provider,
            token_count: self.token_count,
            created_at: parse_datetime(&self.created_at)
                .ok_or_else(|| bad_timestamp("message", self.id, &self.created_at))?,
        })
    }
}

struct ConversationRow {
    id: i64,
    title: String,
    created_at: String,
    last_updated: String,
}

impl ConversationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            created_at: row.get(2)?,
            last_updated: row.get(3)?,
        })
    }

    fn into_conversation(self) -> Result<Conversation> {
        let created_at = parse_datetime(&self.created_at)
            .ok_or_else(|| bad_timestamp("conversation", self.id, &self.created_at))?;
        let last_updated = parse_datetime(&self.last_updated)
            .ok_or_else(|| bad_timestamp("conversation", self.id, &self.last_updated))?;
        Ok(Conversation {
            id: ConversationId(self.id),
            title: self.title,
            created_at,
            last_updated,
        })
    }
}

fn bad_timestamp(what: &str, id: i64, raw: &str) -> StoreError {
    StoreError::Corrupt(format!("{} {} has unreadable timestamp '{}'", what, id, raw))
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
