use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use questline::config::Config;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "questline")]
#[command(version, about = "Resumable multi-account quest runner")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to quest.toml. Defaults to <project>/.questline/quest.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the input files into the account database
    Seed,
    /// Run every stored account through the quest workflow
    Run {
        /// Show *** instead of account ids in logs
        #[arg(long)]
        mask_ids: bool,

        /// Maximum number of accounts processed at once
        #[arg(long, env = "QUESTLINE_MAX_CONCURRENT")]
        max_concurrent: Option<usize>,

        /// Connect directly instead of through account proxies
        #[arg(long)]
        direct: bool,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Show progress across stored accounts
    Status,
    /// Choose an action interactively
    Menu,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default quest.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&project_dir, cli.config.clone(), command.clone());
    }

    let config = Config::new(project_dir, cli.verbose, cli.config.clone())?;
    config.ensure_directories()?;
    let _log_guard = questline::logging::init(&config.log_dir, cli.verbose)?;

    match &cli.command {
        Commands::Seed => cmd::cmd_seed(&config)?,
        Commands::Run {
            mask_ids,
            max_concurrent,
            direct,
            ui,
        } => {
            let opts = cmd::RunOptions {
                mask_ids: *mask_ids,
                max_concurrent: *max_concurrent,
                direct: *direct,
                ui: ui.clone(),
            };
            cmd::cmd_run(config, opts).await?;
        }
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Menu => cmd::cmd_menu(config).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
