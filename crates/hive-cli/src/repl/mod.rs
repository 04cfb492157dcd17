//! Interactive chat loop.
//!
//! A readline prompt with history. Plain lines go to the model; a few
//! keywords and slash commands manage providers and conversations.

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use hive_client::{format_client_error, ClientError};
use hive_core::{Config, ConversationId};

use crate::commands::ask::run_query;
use crate::output::warning;
use crate::AppContext;

mod commands;
mod handlers;

pub use handlers::CliEventHandler;

use commands::Input;

/// Run the interactive REPL.
pub async fn run(ctx: &AppContext, conversation: Option<i64>) -> anyhow::Result<()> {
    ctx.connect_servers().await?;

    let mut conversation = conversation.map(ConversationId);
    print_banner(ctx, conversation).await;

    let mut editor = DefaultEditor::new()?;
    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }

    loop {
        let line = match editor.readline("\nQuery: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let input = commands::parse(&line);
        if input != Input::Empty {
            let _ = editor.add_history_entry(line.trim());
        }

        match input {
            Input::Empty => {}
            Input::Exit => break,
            Input::Help => println!("{}", commands::HELP),
            Input::Tools => {
                for tool in ctx.client.list_tools().await {
                    println!("  {} ({}) - {}", tool.name, tool.server, tool.description);
                }
            }
            Input::Providers => crate::commands::provider::list(ctx),
            Input::UseProvider(name) => match ctx.client.switch_provider(name) {
                Ok(()) => println!("Switched to {}", name),
                Err(e) => eprintln!("Error: {}", format_client_error(&e)),
            },
            Input::New => {
                conversation = None;
                println!("Started a new conversation");
            }
            Input::Unknown(command) => {
                eprintln!("Unknown command: {} (try /help)", command);
            }
            Input::Query(text) => match run_query(&ctx.client, conversation, text).await {
                Ok(reply) => {
                    conversation = Some(reply.conversation_id);
                    println!("\n{}", reply.text().unwrap_or_default());
                }
                Err(ClientError::Cancelled) => eprintln!("{}", warning("query cancelled")),
                Err(e) => eprintln!("Error: {}", format_client_error(&e)),
            },
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);
    println!("Goodbye!");
    Ok(())
}

async fn print_banner(ctx: &AppContext, conversation: Option<ConversationId>) {
    println!("Hive {}", env!("CARGO_PKG_VERSION"));
    match ctx.client.active_provider() {
        Some(provider) => println!("Provider: {} ({})", provider.name(), provider.model()),
        None => println!("{}", warning("no model provider is configured")),
    }
    let tools = ctx.client.list_tools().await.len();
    let servers = ctx.client.list_servers().await.len();
    println!("Tools: {} from {} servers", tools, servers);
    if let Some(id) = conversation {
        println!("Continuing conversation #{}", id);
    }
    println!("Type 'use provider <name>' to switch providers. Type 'quit' to exit.");
}

fn history_path() -> PathBuf {
    Config::data_dir().join("history.txt")
}
