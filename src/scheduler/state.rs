//! Result tracking for a scheduled batch.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Role of an account within its referral group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Generates a referral code for its group
    Seed,
    /// Consumes a seed's referral code
    Dependent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Seed => write!(f, "seed"),
            Role::Dependent => write!(f, "dependent"),
        }
    }
}

/// Result of running one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResult {
    pub account_id: i64,
    /// Id as shown in logs; `***` when masking
    pub display_id: String,
    pub role: Role,
    /// Whether the run finished without a step failure
    pub success: bool,
    /// The account was already complete and nothing ran
    pub skipped: bool,
    /// Generated (seed) or consumed (dependent) code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl AccountResult {
    /// Result of a job that ran to the end of the state machine.
    pub fn finished(
        account_id: i64,
        display_id: String,
        role: Role,
        already_complete: bool,
        code: Option<String>,
        duration: Duration,
    ) -> Self {
        let success = already_complete || code.is_some();
        Self {
            account_id,
            display_id,
            role,
            success,
            skipped: already_complete,
            error: (!success).then(|| "step failed, see error log".to_string()),
            code,
            duration,
        }
    }

    /// Result of a job that never returned normally.
    pub fn aborted(account_id: i64, display_id: String, role: Role, error: &str) -> Self {
        Self {
            account_id,
            display_id,
            role,
            success: false,
            skipped: false,
            code: None,
            error: Some(error.to_string()),
            duration: Duration::ZERO,
        }
    }
}

/// Summary of one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_accounts: usize,
    pub seeds: usize,
    pub dependents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Codes handed to dependent groups, one per seed
    pub codes: Vec<String>,
    /// Dependent groups that received the placeholder code
    pub degraded_groups: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Results in execution order, seeds first
    #[serde(default)]
    pub results: Vec<AccountResult>,
}

impl BatchSummary {
    pub fn new(total_accounts: usize) -> Self {
        Self {
            total_accounts,
            ..Default::default()
        }
    }

    pub fn add_result(&mut self, result: AccountResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if result.skipped {
            self.skipped += 1;
        }
        match result.role {
            Role::Seed => self.seeds += 1,
            Role::Dependent => self.dependents += 1,
        }
        self.results.push(result);
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total_accounts
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total_accounts == 0 {
            return 100.0;
        }
        (self.succeeded as f64 / self.total_accounts as f64) * 100.0
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
