//! Diagnostic command to check installation.

use std::time::Duration;

use hive_core::config::KNOWN_PROVIDERS;
use hive_core::error::default_key_env;
use hive_core::{Config, StorageBackend};
use hive_mcp::{SessionOptions, SessionRegistry};
use hive_providers::ProviderRegistry;

use crate::output::check;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    let config_dir = Config::config_dir();
    println!("Config directory: {}", config_dir.display());
    println!("  {} {}", check(config_dir.exists()), exists_label(config_dir.exists()));

    println!("\nStorage: {:?}", config.storage.backend);
    if config.storage.backend == StorageBackend::Sqlite {
        let path = config.storage.database_path();
        println!("  {} {}", check(path.exists()), path.display());
    } else {
        println!("  Conversations are kept in memory and lost on exit");
    }

    println!("\nProviders:");
    let registry = ProviderRegistry::from_config(&config.providers);
    for capability in registry.capabilities() {
        let status = if capability.available {
            "configured"
        } else {
            "not configured"
        };
        let active = if capability.active { " (active)" } else { "" };
        println!("  {} {} {}{}", check(capability.available), capability.name, status, active);
    }

    println!("\nAPI Keys:");
    for name in KNOWN_PROVIDERS {
        if let Some(var) = default_key_env(name) {
            let set = std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
            println!("  {} {} is {}", check(set), var, if set { "set" } else { "not set" });
        }
    }

    println!("\nTool servers:");
    let descriptors = config.server_descriptors()?;
    if descriptors.is_empty() {
        println!("  No servers configured");
    } else {
        let sessions = SessionRegistry::new(SessionOptions::from(&config.limits))
            .with_shutdown_timeout(Duration::from_secs(config.limits.shutdown_timeout_secs));
        for descriptor in &descriptors {
            match sessions.register(descriptor).await {
                Ok(tools) => println!(
                    "  ✓ {} ({}) {} tools",
                    descriptor.name,
                    descriptor.transport.label(),
                    tools.len()
                ),
                Err(e) => println!("  ✗ {} ({}) {}", descriptor.name, descriptor.transport.label(), e),
            }
        }
        sessions.shutdown_all().await;
    }

    println!("\nDiagnostics complete.");
    Ok(())
}

fn exists_label(exists: bool) -> &'static str {
    if exists {
        "Exists"
    } else {
        "Does not exist (defaults are used)"
    }
}
