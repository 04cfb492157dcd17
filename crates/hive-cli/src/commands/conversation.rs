//! Stored conversation commands.

use hive_client::format_client_error;
use hive_core::{ConversationId, StorageBackend};
use hive_store::ConversationStore;

use crate::output::{format_message, format_time};
use crate::{AppContext, ConversationAction};

pub async fn handle(action: ConversationAction, ctx: &AppContext) -> anyhow::Result<()> {
    if ctx.config.storage.backend == StorageBackend::Memory {
        println!("Conversations are kept in memory; set storage.backend = \"sqlite\" to keep them.");
        return Ok(());
    }

    match action {
        ConversationAction::List { limit } => list(ctx, limit).await,
        ConversationAction::Show { id } => show(ctx, ConversationId(id)).await,
    }
}

async fn list(ctx: &AppContext, limit: usize) -> anyhow::Result<()> {
    let conversations = ctx
        .client
        .list_conversations(limit)
        .await
        .map_err(|e| anyhow::anyhow!(format_client_error(&e)))?;

    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    for conversation in conversations {
        println!(
            "{:>5}  {}  {}",
            conversation.id,
            format_time(&conversation.last_updated),
            conversation.title
        );
    }
    Ok(())
}

async fn show(ctx: &AppContext, id: ConversationId) -> anyhow::Result<()> {
    let store = ctx.client.store();
    let conversation = store.get_conversation(id).await?;
    let total = store.conversation_messages(id).await?.len();

    println!("{} (#{})", conversation.title, conversation.id);
    println!("Started {}, {} messages\n", format_time(&conversation.created_at), total);

    let Some(latest) = store.latest_message(id).await? else {
        return Ok(());
    };
    let path = store.path_to(latest.id).await?;
    if path.len() < total {
        println!("(showing the latest branch, {} of {} messages)\n", path.len(), total);
    }
    for message in &path {
        println!("{}", format_message(message));
    }
    println!("\n{} tokens on this path", store.path_cost(latest.id).await?);
    Ok(())
}
