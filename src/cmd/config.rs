//! Configuration view and validation commands — `ticketsmith config`.

use std::path::Path;

use anyhow::{Context, Result};
use ticketsmith::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, command: ConfigCommands) -> Result<()> {
    let config = Config::load_layered(config_path)?;

    match command {
        ConfigCommands::Show => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!(
                    "# No config file at {}, showing defaults with environment overrides",
                    config_path.display()
                );
            }
            let rendered =
                toml::to_string_pretty(&config.redacted()).context("Failed to render config")?;
            println!("{}", rendered);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration is valid.");
            println!("  ai_provider = {}", config.ai_provider);
            println!("  components  = {}", config.component_to_repo.len());
            if config.jira.pr_field_name.is_none() {
                println!("  warning: jira.pr_field_name is not set, feedback scanner disabled");
            }
        }
    }
    Ok(())
}
