//! Progress overview across every stored account.

use anyhow::Result;
use console::style;
use questline::config::Config;
use questline::scheduler::GROUP_SIZE;
use questline::store::AccountDb;

pub fn cmd_status(config: &Config) -> Result<()> {
    let db = AccountDb::new(&config.db_path)?;
    let stats = db.stats()?;

    println!();
    println!("{}", style("Account Status").bold());
    println!("==============");
    println!();

    if stats.total == 0 {
        println!("No accounts stored. Run 'questline seed' first.");
        println!();
        return Ok(());
    }

    let rows = [
        ("Signed in", stats.signed_in),
        ("Registered", stats.registered),
        ("Followed", stats.followed_account),
        ("Handle linked", stats.handle_linked),
        ("OAuth linked", stats.oauth_linked),
        ("Codes generated", stats.codes_generated),
        ("Codes consumed", stats.codes_consumed),
    ];
    for (label, count) in rows {
        println!("  {:<16} {:>6} / {}", label, count, stats.total);
    }
    println!();
    println!(
        "  {:<16} {:>6} / {}",
        style("Complete").green().bold(),
        stats.complete,
        stats.total
    );
    if stats.with_errors > 0 {
        println!(
            "  {:<16} {:>6}",
            style("With errors").red(),
            stats.with_errors
        );
    }
    if stats.total % GROUP_SIZE != 0 {
        println!();
        println!(
            "{} {} accounts cannot be scheduled: the count must be a multiple of {}",
            style("!").yellow().bold(),
            stats.total,
            GROUP_SIZE
        );
    }
    println!();
    Ok(())
}
