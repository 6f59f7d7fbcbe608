//! Interactive launcher over the seed and run commands.

use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};
use questline::config::Config;

use super::{RunOptions, cmd_run, cmd_seed};

const OPTIONS: [&str; 4] = [
    "Seed accounts from input files",
    "Run batch (visible ids)",
    "Run batch (masked ids)",
    "Exit",
];

pub async fn cmd_menu(config: Config) -> Result<()> {
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What do you want to do?")
        .items(OPTIONS)
        .default(1)
        .interact()?;

    match selection {
        0 => cmd_seed(&config),
        1 => cmd_run(config, RunOptions::default()).await,
        2 => {
            cmd_run(
                config,
                RunOptions {
                    mask_ids: true,
                    ..RunOptions::default()
                },
            )
            .await
        }
        _ => Ok(()),
    }
}
