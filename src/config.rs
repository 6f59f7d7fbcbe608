use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::http::ApiSettings;
use crate::api::retry::RetryPolicy;
use crate::quest_config::{CONFIG_FILE, DelayRange, QuestToml};
use crate::runner::RunnerConfig;

/// Name of the data directory created inside the project directory.
pub const DATA_DIR_NAME: &str = ".questline";

/// Runtime configuration for questline.
///
/// Bridges `QuestToml` with the runtime needs of the commands: resolved
/// paths plus the per-component settings derived from the file.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub input_dir: PathBuf,
    pub verbose: bool,
    quest: QuestToml,
}

impl Config {
    /// Resolve paths under `project_dir` and load `quest.toml`.
    ///
    /// `config_file` overrides the default `<project>/.questline/quest.toml`.
    pub fn new(project_dir: PathBuf, verbose: bool, config_file: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let data_dir = project_dir.join(DATA_DIR_NAME);
        let config_file = config_file.unwrap_or_else(|| data_dir.join(CONFIG_FILE));

        let mut quest = if config_file.exists() {
            QuestToml::load(&config_file)?
        } else {
            QuestToml::default()
        };
        quest.apply_env();

        Ok(Self::from_parts(project_dir, data_dir, config_file, verbose, quest))
    }

    /// Build a config around an already-loaded `QuestToml`.
    pub fn from_parts(
        project_dir: PathBuf,
        data_dir: PathBuf,
        config_file: PathBuf,
        verbose: bool,
        quest: QuestToml,
    ) -> Self {
        let db_path = data_dir.join(&quest.storage.db_file);
        let log_dir = data_dir.join("logs");
        let input_dir = resolve_under(&project_dir, &quest.input.dir);

        Self {
            project_dir,
            data_dir,
            config_file,
            db_path,
            log_dir,
            input_dir,
            verbose,
            quest,
        }
    }

    pub fn quest(&self) -> &QuestToml {
        &self.quest
    }

    /// Override the worker bound from the command line. Zero is ignored.
    pub fn set_max_concurrent(&mut self, n: usize) {
        if n > 0 {
            self.quest.workers.max_concurrent = n;
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.quest.workers.max_concurrent.max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.quest.workers.queue_capacity.max(1)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).context("Failed to create data directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Step pacing and referral limits for the state machine.
    ///
    /// Fails when a delay range cannot be represented as a `Duration`.
    pub fn runner_config(&self, mask_ids: bool) -> Result<RunnerConfig> {
        let q = &self.quest;
        Ok(RunnerConfig {
            step_delay: DelayRange::from_secs(q.delay.min_secs, q.delay.max_secs)
                .context("Invalid [delay] range")?,
            code_cooldown: DelayRange::from_secs(
                q.referral.cooldown_min_secs,
                q.referral.cooldown_max_secs,
            )
            .context("Invalid [referral] cooldown range")?,
            pending_backoff: DelayRange::from_secs(
                q.referral.pending_min_secs,
                q.referral.pending_max_secs,
            )
            .context("Invalid [referral] pending range")?,
            max_pending_polls: q.referral.max_pending_polls.max(1),
            max_code_attempts: q.referral.max_code_attempts.max(1),
            mask_ids,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let http = &self.quest.http;
        RetryPolicy {
            attempts: http.retry_attempts.max(1),
            rate_limit_cooldown: Duration::from_secs(http.rate_limit_cooldown_secs),
            backoff: Duration::from_secs(http.retry_backoff_secs),
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.quest.api.base_url.trim_end_matches('/').to_string(),
            endpoints: self.quest.api.endpoints.clone(),
            timeout: Duration::from_secs(self.quest.http.timeout_secs.max(1)),
            retry: self.retry_policy(),
        }
    }
}

fn resolve_under(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
