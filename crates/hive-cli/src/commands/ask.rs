//! One-shot question mode.

use hive_client::{format_client_error, Client, ClientError, CancellationToken};
use hive_core::{ConversationId, Message};

use crate::AppContext;

/// Submit one query, cancelling it on Ctrl-C.
pub async fn run_query(
    client: &Client,
    conversation: Option<ConversationId>,
    text: &str,
) -> Result<Message, ClientError> {
    let cancel = CancellationToken::new();
    let query = client.submit_query_with_cancel(conversation, text, &cancel);
    tokio::pin!(query);

    tokio::select! {
        result = &mut query => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            query.await
        }
    }
}

pub async fn run(ctx: &AppContext, prompt: &str, conversation: Option<i64>) -> anyhow::Result<()> {
    ctx.connect_servers().await?;

    let reply = run_query(&ctx.client, conversation.map(ConversationId), prompt)
        .await
        .map_err(|e| anyhow::anyhow!(format_client_error(&e)))?;

    println!("{}", reply.text().unwrap_or_default());
    Ok(())
}
