//! Batch execution command: `questline run`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use questline::api::HttpSessionFactory;
use questline::broker::UpdateBroker;
use questline::config::Config;
use questline::pool::WorkerPool;
use questline::scheduler::{GroupScheduler, ScheduleEvent};
use questline::store::{AccountDb, DbHandle};
use questline::ui::{BatchUI, UiMode};
use tokio::sync::mpsc;
use tracing::info;

/// Flags of the `run` subcommand.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Log `***` instead of account ids
    pub mask_ids: bool,
    pub max_concurrent: Option<usize>,
    /// Skip per-account proxies
    pub direct: bool,
    pub ui: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mask_ids: false,
            max_concurrent: None,
            direct: false,
            ui: "full".to_string(),
        }
    }
}

pub async fn cmd_run(mut config: Config, opts: RunOptions) -> Result<()> {
    if let Some(n) = opts.max_concurrent {
        config.set_max_concurrent(n);
    }

    let runner_config = config.runner_config(opts.mask_ids)?;

    let db = AccountDb::new(&config.db_path)?;
    let accounts = db.load_all().context("Failed to load accounts")?;
    if accounts.is_empty() {
        println!("No accounts stored. Run 'questline seed' first.");
        return Ok(());
    }
    let db = DbHandle::new(db);

    info!(
        accounts = accounts.len(),
        max_concurrent = config.max_concurrent(),
        mask_ids = opts.mask_ids,
        "Preparing batch run"
    );

    let broker = UpdateBroker::spawn(db, config.queue_capacity());

    let mut sessions = HttpSessionFactory::new(config.api_settings());
    if opts.direct {
        sessions = sessions.direct();
    }
    let pool = WorkerPool::new(
        config.max_concurrent(),
        Arc::new(sessions),
        Arc::new(runner_config),
        broker.sender(),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<ScheduleEvent>(100);
    let ui = Arc::new(BatchUI::new(
        accounts.len(),
        UiMode::parse(&opts.ui),
        config.verbose,
    ));
    let ui_clone = ui.clone();
    let display_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            ui_clone.handle_event(&event);
        }
    });

    let scheduler = GroupScheduler::new(pool).with_event_channel(event_tx);
    let result = scheduler.execute(accounts).await;

    // Dropping the scheduler closes the event channel so the display drains.
    drop(scheduler);
    let _ = display_handle.await;
    let broker_stats = broker.close().await;

    let summary = result?;
    if broker_stats.failed > 0 {
        println!(
            "{} {} progress updates could not be stored, see the log",
            style("!").yellow().bold(),
            broker_stats.failed
        );
    }
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        updates_applied = broker_stats.applied,
        "Run finished"
    );
    Ok(())
}
