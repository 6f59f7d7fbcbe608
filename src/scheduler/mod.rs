//! Two-phase referral group scheduling.
//!
//! A batch of `n = 11k` accounts splits into `k` seeds and `10k` dependents.
//! Seeds run first, all at once under the pool's concurrency bound, and each
//! produces a referral code. Dependents are then chunked ten at a time and
//! every chunk consumes one seed's code, round-robin.
//!
//! ```text
//! accounts (load order)
//!   ├── [0, k)     seeds        ──run_all──▶ codes c0..c(k-1)
//!   └── [k, 11k)   dependents
//!         chunk 0  ◀── c0
//!         chunk 1  ◀── c1
//!         ...
//!         chunk i  ◀── c(i mod k)   ──run_windowed──▶ results
//! ```

pub mod state;

use questline_common::{AccountRecord, CODE_SENTINEL};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::errors::ScheduleError;
use crate::pool::{Job, WorkerPool};

pub use state::{AccountResult, BatchSummary, ExecutionTimer, Role};

/// Every seed account is followed by this many dependents.
pub const DEPENDENTS_PER_SEED: usize = 10;

/// Accounts per referral group: one seed plus its dependents.
pub const GROUP_SIZE: usize = DEPENDENTS_PER_SEED + 1;

/// Events emitted while a batch runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleEvent {
    /// The batch was planned.
    BatchStarted { seeds: usize, dependents: usize },
    /// A group of accounts was submitted.
    GroupStarted { role: Role, accounts: usize },
    /// One account's job started.
    AccountStarted { display_id: String, role: Role },
    /// One account's job finished.
    AccountFinished { result: AccountResult },
    /// Seed codes were distributed over dependent chunks.
    CodesAssigned {
        codes: Vec<String>,
        groups: usize,
        degraded_groups: usize,
    },
    /// The whole batch finished.
    BatchCompleted { summary: BatchSummary },
}

/// Seed/dependent split of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    pub seeds: Vec<AccountRecord>,
    pub dependents: Vec<AccountRecord>,
}

/// Accounts that run together with one role and, for dependents, one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleGroup {
    pub accounts: Vec<AccountRecord>,
    pub role: Role,
    pub assigned_code: Option<String>,
}

impl ScheduleGroup {
    /// True when the group was handed the placeholder code.
    pub fn is_degraded(&self) -> bool {
        self.role == Role::Dependent && self.assigned_code.as_deref() == Some(CODE_SENTINEL)
    }
}

/// Split `accounts` into seeds and dependents, preserving load order.
pub fn plan(accounts: Vec<AccountRecord>) -> Result<SchedulePlan, ScheduleError> {
    let total = accounts.len();
    if total % GROUP_SIZE != 0 {
        return Err(ScheduleError::BatchSizeNotDivisible {
            total,
            group: GROUP_SIZE,
        });
    }

    let seed_count = total / GROUP_SIZE;
    let mut seeds = accounts;
    let dependents = seeds.split_off(seed_count);
    Ok(SchedulePlan { seeds, dependents })
}

/// Chunk dependents into groups of ten; chunk `i` gets `codes[i mod k]`.
///
/// With no codes at all every chunk gets the placeholder code.
pub fn assign_codes(dependents: Vec<AccountRecord>, codes: &[String]) -> Vec<ScheduleGroup> {
    let mut groups = Vec::with_capacity(dependents.len().div_ceil(DEPENDENTS_PER_SEED));
    let mut remaining = dependents.into_iter();

    loop {
        let chunk: Vec<AccountRecord> = remaining.by_ref().take(DEPENDENTS_PER_SEED).collect();
        if chunk.is_empty() {
            break;
        }
        let code = if codes.is_empty() {
            CODE_SENTINEL.to_string()
        } else {
            codes[groups.len() % codes.len()].clone()
        };
        groups.push(ScheduleGroup {
            accounts: chunk,
            role: Role::Dependent,
            assigned_code: Some(code),
        });
    }
    groups
}

/// Pick each seed's code: a stored real code wins, then the run's result,
/// then the stored value (the placeholder when the seed failed).
pub fn collect_seed_codes(seeds: &[AccountRecord], results: &[Option<String>]) -> Vec<String> {
    seeds
        .iter()
        .enumerate()
        .map(|(i, seed)| {
            if seed.has_code() {
                return seed.code_value.clone();
            }
            match results.get(i).cloned().flatten() {
                Some(code) if code != CODE_SENTINEL => code,
                _ => seed.code_value.clone(),
            }
        })
        .collect()
}

/// Plans and executes a batch over a worker pool.
pub struct GroupScheduler {
    pool: WorkerPool,
    event_tx: Option<mpsc::Sender<ScheduleEvent>>,
}

impl GroupScheduler {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            event_tx: None,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ScheduleEvent>) -> Self {
        self.pool = self.pool.with_event_channel(tx.clone());
        self.event_tx = Some(tx);
        self
    }

    /// Run the whole batch: seeds, code distribution, then dependents.
    ///
    /// Only a batch size that is not a multiple of the group size is an
    /// error; per-account failures are recorded in the summary.
    pub async fn execute(&self, accounts: Vec<AccountRecord>) -> Result<BatchSummary, ScheduleError> {
        let timer = ExecutionTimer::start();
        let total = accounts.len();
        let SchedulePlan { seeds, dependents } = plan(accounts)?;
        let mut summary = BatchSummary::new(total);

        if total == 0 {
            info!("Empty batch, nothing to do");
            self.emit_event(ScheduleEvent::BatchCompleted {
                summary: summary.clone(),
            })
            .await;
            return Ok(summary);
        }

        info!(
            seeds = seeds.len(),
            dependents = dependents.len(),
            max_concurrent = self.pool.max_concurrent(),
            "Starting batch"
        );
        self.emit_event(ScheduleEvent::BatchStarted {
            seeds: seeds.len(),
            dependents: dependents.len(),
        })
        .await;

        // Phase 1: seeds
        self.emit_event(ScheduleEvent::GroupStarted {
            role: Role::Seed,
            accounts: seeds.len(),
        })
        .await;
        let seed_jobs = seeds.iter().cloned().map(Job::seed).collect();
        let seed_results = self.pool.run_all(seed_jobs).await;
        let seed_codes: Vec<Option<String>> =
            seed_results.iter().map(|r| r.code.clone()).collect();
        for result in seed_results {
            summary.add_result(result);
        }

        // Phase 2: distribute codes
        let codes = collect_seed_codes(&seeds, &seed_codes);
        let groups = assign_codes(dependents, &codes);
        let degraded = groups.iter().filter(|g| g.is_degraded()).count();
        if degraded > 0 {
            warn!(
                degraded_groups = degraded,
                "Seeds without a referral code; their dependents will fail the code exchange"
            );
        }
        info!(codes = codes.len(), groups = groups.len(), "Assigned referral codes");
        self.emit_event(ScheduleEvent::CodesAssigned {
            codes: codes.clone(),
            groups: groups.len(),
            degraded_groups: degraded,
        })
        .await;
        summary.codes = codes;
        summary.degraded_groups = degraded;

        // Phase 3: dependents
        let dependent_jobs: Vec<Job> = groups
            .into_iter()
            .flat_map(|group| {
                let code = group
                    .assigned_code
                    .unwrap_or_else(|| CODE_SENTINEL.to_string());
                group
                    .accounts
                    .into_iter()
                    .map(move |account| Job::dependent(account, code.clone()))
            })
            .collect();
        self.emit_event(ScheduleEvent::GroupStarted {
            role: Role::Dependent,
            accounts: dependent_jobs.len(),
        })
        .await;
        for result in self.pool.run_windowed(dependent_jobs).await {
            summary.add_result(result);
        }

        summary.duration = timer.elapsed();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_secs = summary.duration.as_secs(),
            "Batch completed"
        );
        self.emit_event(ScheduleEvent::BatchCompleted {
            summary: summary.clone(),
        })
        .await;
        Ok(summary)
    }

    async fn emit_event(&self, event: ScheduleEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}
