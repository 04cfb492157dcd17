//! Behaviour every conversation store must share, run against each backend.

use std::sync::Arc;

use hive_core::{ConversationId, MessageContent, MessageId, NewMessage, Role};
use hive_store::{
    ConversationStore, MemoryConversationStore, SqliteConversationStore, StoreError,
};
use serde_json::json;
use tempfile::TempDir;

struct Fixture {
    store: Arc<dyn ConversationStore>,
    _dir: Option<TempDir>,
}

fn memory() -> Fixture {
    Fixture {
        store: Arc::new(MemoryConversationStore::new()),
        _dir: None,
    }
}

fn sqlite() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = SqliteConversationStore::new(dir.path().join("conversations.db")).unwrap();
    Fixture {
        store: Arc::new(store),
        _dir: Some(dir),
    }
}

macro_rules! store_tests {
    ($($name:ident),* $(,)?) => {
        mod memory_backend {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(super::memory()).await;
                }
            )*
        }

        mod sqlite_backend {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(super::sqlite()).await;
                }
            )*
        }
    };
}

store_tests!(
    tool_loop_tree_is_linear,
    branches_share_ancestors,
    context_respects_budget,
    rejects_misplaced_messages,
    default_and_custom_titles,
    listing_orders_by_activity,
    concurrent_appends_are_serialised,
    unknown_ids_are_reported,
);

/// user -> tool call -> tool result -> model text
async fn tool_loop_tree_is_linear(f: Fixture) {
    let store = f.store;
    let conversation = store.new_conversation(None).await.unwrap();
    let c = conversation.id;

    let root = store.append(NewMessage::user(c, None, "what is 2+2")).await.unwrap();
    let call = store
        .append(NewMessage::tool_call(c, root.id, "add", json!({"a": 2, "b": 2})).with_provider("gemini"))
        .await
        .unwrap();
    let result = store
        .append(NewMessage::tool_result(c, call.id, "add", json!({"result": ["4"]}), false))
        .await
        .unwrap();
    let answer = store
        .append(NewMessage::model_text(c, result.id, "2+2 is 4").with_provider("gemini"))
        .await
        .unwrap();

    assert!(root.is_root());
    assert_eq!(call.parent_id, Some(root.id));
    assert_eq!(answer.token_count, MessageContent::text("2+2 is 4").estimate_tokens());

    let path = store.path_to(answer.id).await.unwrap();
    let roles: Vec<Role> = path.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Model, Role::ToolResult, Role::Model]);
    assert_eq!(path[1].content, MessageContent::tool_call("add", json!({"a": 2, "b": 2})));
    assert_eq!(path[3], answer);

    let latest = store.latest_message(c).await.unwrap().unwrap();
    assert_eq!(latest.id, answer.id);

    let cost = store.path_cost(answer.id).await.unwrap();
    assert_eq!(cost, path.iter().map(|m| u64::from(m.token_count)).sum::<u64>());

    let all = store.conversation_messages(c).await.unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].id.0 < w[1].id.0));

    let updated = store.get_conversation(c).await.unwrap();
    assert!(updated.last_updated >= conversation.last_updated);
}

async fn branches_share_ancestors(f: Fixture) {
    let store = f.store;
    let c = store.new_conversation(Some("branching")).await.unwrap().id;

    let root = store.append(NewMessage::user(c, None, "hello")).await.unwrap();
    let first = store.append(NewMessage::model_text(c, root.id, "hi")).await.unwrap();
    let second = store.append(NewMessage::model_text(c, root.id, "hey")).await.unwrap();
    let follow_up = store
        .append(NewMessage::user(c, Some(first.id), "how are you"))
        .await
        .unwrap();

    let ids = |path: Vec<hive_core::Message>| path.into_iter().map(|m| m.id).collect::<Vec<_>>();
    assert_eq!(ids(store.path_to(second.id).await.unwrap()), vec![root.id, second.id]);
    assert_eq!(
        ids(store.path_to(follow_up.id).await.unwrap()),
        vec![root.id, first.id, follow_up.id]
    );
}

async fn context_respects_budget(f: Fixture) {
    let store = f.store;
    let c = store.new_conversation(None).await.unwrap().id;

    // Each 36-character message costs 10 tokens
    let text = "a".repeat(36);
    let mut parent = None;
    let mut ids = Vec::new();
    for _ in 0..4 {
        let message = store.append(NewMessage::user(c, parent, text.clone())).await.unwrap();
        assert_eq!(message.token_count, 10);
        parent = Some(message.id);
        ids.push(message.id);
    }
    let leaf = ids[3];

    let full = store.context_for(leaf, 8000).await.unwrap();
    assert_eq!(full.len(), 4);

    let trimmed = store.context_for(leaf, 25).await.unwrap();
    assert_eq!(trimmed.iter().map(|m| m.id).collect::<Vec<_>>(), vec![ids[2], ids[3]]);

    // The leaf alone is over budget but still returned
    let tiny = store.context_for(leaf, 5).await.unwrap();
    assert_eq!(tiny.len(), 1);
    assert_eq!(tiny[0].id, leaf);
}

async fn rejects_misplaced_messages(f: Fixture) {
    let store = f.store;
    let a = store.new_conversation(None).await.unwrap().id;
    let b = store.new_conversation(None).await.unwrap().id;
    let root_a = store.append(NewMessage::user(a, None, "in a")).await.unwrap();

    let err = store.append(NewMessage::user(a, None, "second root")).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateRoot(id) if id == a));

    let err = store
        .append(NewMessage::user(b, Some(root_a.id), "wrong tree"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ParentInOtherConversation { .. }), "got {:?}", err);

    let err = store
        .append(NewMessage::user(a, Some(MessageId(9_999)), "orphan"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownParent(MessageId(9_999))));

    let err = store
        .append(NewMessage::user(ConversationId(9_999), None, "nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownConversation(_)));

    // A user message cannot carry a tool call
    let bad = NewMessage::new(a, Some(root_a.id), Role::User, MessageContent::tool_call("add", json!({})));
    assert!(matches!(
        store.append(bad).await.unwrap_err(),
        StoreError::InvalidMessage { .. }
    ));

    // Nothing above was stored
    assert_eq!(store.conversation_messages(a).await.unwrap().len(), 1);
    assert!(store.conversation_messages(b).await.unwrap().is_empty());
}

async fn default_and_custom_titles(f: Fixture) {
    let store = f.store;
    let untitled = store.new_conversation(None).await.unwrap();
    assert!(untitled.title.starts_with("Conversation "));

    let titled = store.new_conversation(Some("Maths")).await.unwrap();
    assert_eq!(store.get_conversation(titled.id).await.unwrap().title, "Maths");
    assert_ne!(untitled.id, titled.id);
}

async fn listing_orders_by_activity(f: Fixture) {
    let store = f.store;
    let older = store.new_conversation(Some("older")).await.unwrap().id;
    let newer = store.new_conversation(Some("newer")).await.unwrap().id;

    let listed = store.list_conversations(10).await.unwrap();
    assert_eq!(listed[0].id, newer);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.append(NewMessage::user(older, None, "bump")).await.unwrap();

    let listed = store.list_conversations(10).await.unwrap();
    assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![older, newer]);
    assert_eq!(store.list_conversations(1).await.unwrap().len(), 1);
}

async fn concurrent_appends_are_serialised(f: Fixture) {
    let store = f.store;
    let c = store.new_conversation(None).await.unwrap().id;
    let root = store.append(NewMessage::user(c, None, "root")).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .append(NewMessage::model_text(c, root.id, format!("reply {i}")))
                .await
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert_eq!(store.conversation_messages(c).await.unwrap().len(), 17);
}

async fn unknown_ids_are_reported(f: Fixture) {
    let store = f.store;
    assert!(matches!(
        store.get_message(MessageId(42)).await,
        Err(StoreError::UnknownMessage(MessageId(42)))
    ));
    assert!(matches!(
        store.path_to(MessageId(42)).await,
        Err(StoreError::UnknownMessage(_))
    ));
    assert!(matches!(
        store.latest_message(ConversationId(42)).await,
        Err(StoreError::UnknownConversation(_))
    ));

    let c = store.new_conversation(None).await.unwrap().id;
    assert_eq!(store.latest_message(c).await.unwrap(), None);
}
