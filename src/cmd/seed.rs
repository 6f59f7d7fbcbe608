//! Load the credential files into the account database.

use anyhow::{Context, Result};
use console::style;
use questline::config::Config;
use questline::input::seed_accounts;
use questline::store::AccountDb;

pub fn cmd_seed(config: &Config) -> Result<()> {
    let db = AccountDb::new(&config.db_path)?;
    let report = seed_accounts(&config.input_dir, &db).with_context(|| {
        format!(
            "Failed to seed accounts from {}",
            config.input_dir.display()
        )
    })?;

    println!(
        "{} Seeded {} new accounts ({} already stored)",
        style("✓").green().bold(),
        style(report.inserted).cyan().bold(),
        report.skipped
    );
    Ok(())
}
