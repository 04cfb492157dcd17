//! Configuration commands.

use std::path::Path;

use hive_core::Config;

use crate::ConfigAction;

const REDACTED: &str = "********";

pub fn handle(action: &ConfigAction, config: &Config, extra: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&redacted(config))?);
        }
        ConfigAction::Path => {
            println!("Read in order, later files win:");
            println!("  {}", Config::config_dir().join("config.toml").display());
            println!("  .hive/config.toml");
            println!("  .hive/config.local.toml");
            if let Some(path) = extra {
                println!("  {}", path.display());
            }
            println!("Then HIVE_* environment variables (nested keys use '__').");
        }
    }
    Ok(())
}

/// A copy of `config` with inline API keys masked.
fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    let providers = &mut config.providers;
    for section in [&mut providers.gemini, &mut providers.groq, &mut providers.anthropic]
        .into_iter()
        .flatten()
    {
        if section.api_key.as_ref().is_some_and(|k| !k.is_empty()) {
            section.api_key = Some(REDACTED.to_string());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::config::ProviderConfig;

    #[test]
    fn test_redacts_inline_keys() {
        let mut config = Config::default();
        config.providers.groq = Some(ProviderConfig {
            api_key: Some("gsk-secret".into()),
            ..Default::default()
        });
        config.providers.gemini = Some(ProviderConfig {
            api_key_env: Some("MY_GEMINI_KEY".into()),
            ..Default::default()
        });

        let shown = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(!shown.contains("gsk-secret"));
        assert!(shown.contains(REDACTED));
        assert!(shown.contains("MY_GEMINI_KEY"));
    }

    #[test]
    fn test_shows_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[limits]\nmax_tool_iterations = 4\n\n[servers.calc]\ncommand = \"calc-server\"\nargs = [\"--stdio\"]\n",
        )
        .unwrap();

        let config = Config::load_validated(Some(&path)).unwrap();
        let shown = toml::to_string_pretty(&redacted(&config)).unwrap();
        assert!(shown.contains("max_tool_iterations = 4"));
        assert!(shown.contains("[servers.calc]"));
        assert!(shown.contains("calc-server"));
    }
}
