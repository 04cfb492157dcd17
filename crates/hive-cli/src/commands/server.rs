//! Tool server and tool listings.

use std::collections::BTreeMap;

use crate::output::{truncate, warning};
use crate::AppContext;

pub async fn list_servers(ctx: &AppContext) -> anyhow::Result<()> {
    let descriptors = ctx.config.server_descriptors()?;
    if descriptors.is_empty() {
        println!("No tool servers configured.");
        println!("\nAdd a [servers.<name>] section with a 'command' or an sse 'url'.");
        return Ok(());
    }

    let report = ctx.client.connect_servers(&descriptors).await;
    for status in ctx.client.list_servers().await {
        println!("  {} [{}] {} tools", status.name, status.state, status.tool_count);
    }
    for (name, error) in &report.failed {
        println!("  {} [failed] {}", name, error);
        if let Some(hint) = error.recovery_suggestion() {
            println!("    {}", hint);
        }
    }
    Ok(())
}

pub async fn list_tools(ctx: &AppContext) -> anyhow::Result<()> {
    ctx.connect_servers().await?;

    let tools = ctx.client.list_tools().await;
    if tools.is_empty() {
        eprintln!("{}", warning("no tools available"));
        return Ok(());
    }

    let mut by_server: BTreeMap<&str, Vec<_>> = BTreeMap::new();
    for tool in &tools {
        by_server.entry(tool.server.as_str()).or_default().push(tool);
    }
    for (server, tools) in by_server {
        println!("{}:", server);
        for tool in tools {
            println!("  {} - {}", tool.name, truncate(&tool.description, 70));
        }
    }
    Ok(())
}
