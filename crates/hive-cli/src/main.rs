//! # hive-cli
//!
//! Command-line front end for Hive.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hive_client::{format_client_error, Client};
use hive_core::Config;

mod commands;
mod output;
mod repl;

/// Shared state handed to every command.
pub struct AppContext {
    pub config: Config,
    pub client: Arc<Client>,
}

impl AppContext {
    /// Connect every enabled server from the configuration, reporting failures.
    pub async fn connect_servers(&self) -> anyhow::Result<()> {
        let descriptors = self.config.server_descriptors()?;
        if descriptors.is_empty() {
            return Ok(());
        }
        let report = self.client.connect_servers(&descriptors).await;
        for (name, error) in &report.failed {
            eprintln!("{}", output::warning(&format!("server '{}' unavailable: {}", name, error)));
        }
        Ok(())
    }
}

/// Hive - chat with language models that can call tool servers
#[derive(Parser)]
#[command(name = "hive")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Extra configuration file layered over the defaults
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Provider to use (gemini, groq, anthropic)
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat (the default)
    Chat {
        /// Continue an existing conversation
        #[arg(short, long, value_name = "ID")]
        conversation: Option<i64>,
    },
    /// Ask a single question and print the answer
    Ask {
        /// The question
        prompt: String,
        /// Continue an existing conversation
        #[arg(short, long, value_name = "ID")]
        conversation: Option<i64>,
    },
    /// List the tools offered by the configured servers
    Tools,
    /// List model providers and their availability
    Providers,
    /// Connect the configured servers and show their state
    Servers,
    /// Stored conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Diagnose installation issues
    Doctor,
}

#[derive(Subcommand)]
pub enum ConversationAction {
    /// List recent conversations
    List {
        /// Maximum conversations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Print the latest path of a conversation
    Show {
        /// Conversation ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show where configuration is read from
    Path,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_validated(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!(hive_core::error::format_error_with_suggestion(&e)))?;

    // Commands that only read configuration never open storage
    match &cli.command {
        Some(Commands::Config { action }) => return commands::config::handle(action, &config, cli.config.as_deref()),
        Some(Commands::Doctor) => return commands::doctor::run(&config).await,
        _ => {}
    }

    let client = Client::from_config(&config)
        .map_err(|e| anyhow::anyhow!(format_client_error(&e)))?
        .with_event_handler(Arc::new(repl::CliEventHandler::new()));
    if let Some(ref provider) = cli.provider {
        client
            .switch_provider(provider)
            .map_err(|e| anyhow::anyhow!(format_client_error(&e)))?;
    }

    let ctx = AppContext {
        config,
        client: Arc::new(client),
    };

    let result = match cli.command {
        Some(Commands::Ask { prompt, conversation }) => {
            commands::ask::run(&ctx, &prompt, conversation).await
        }
        Some(Commands::Tools) => commands::server::list_tools(&ctx).await,
        Some(Commands::Providers) => {
            commands::provider::list(&ctx);
            Ok(())
        }
        Some(Commands::Servers) => commands::server::list_servers(&ctx).await,
        Some(Commands::Conversations { action }) => commands::conversation::handle(action, &ctx).await,
        Some(Commands::Chat { conversation }) => repl::run(&ctx, conversation).await,
        None => repl::run(&ctx, None).await,
        Some(Commands::Config { .. }) | Some(Commands::Doctor) => Ok(()),
    };

    ctx.client.shutdown().await;
    result
}
