//! Configuration view and validation commands: `questline config`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use questline::config::DATA_DIR_NAME;
use questline::quest_config::{CONFIG_FILE, QuestToml};

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config_file: Option<PathBuf>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path =
        config_file.unwrap_or_else(|| project_dir.join(DATA_DIR_NAME).join(CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Questline Configuration");
            println!("=======================");
            println!();

            let mut quest = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                QuestToml::load(&config_path)?
            } else {
                println!("No quest.toml found at {}", config_path.display());
                println!("Using default configuration.");
                QuestToml::default()
            };
            println!();

            quest.apply_env();
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&quest)?);
            println!();

            if !config_path.exists() {
                println!("Run 'questline config init' to create a quest.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No quest.toml found. Using defaults (valid).");
                return Ok(());
            }

            let quest = QuestToml::load(&config_path)?;
            let warnings = quest.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("quest.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            QuestToml::default().save(&config_path)?;

            println!("Created quest.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [workers] max_concurrent, queue_capacity");
            println!("  - [delay] and [referral] pacing ranges");
            println!("  - [api] base_url and [api.endpoints] paths");
            println!();
        }
    }

    Ok(())
}
