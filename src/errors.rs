//! Typed error hierarchy for questline.
//!
//! Four top-level enums cover the four failure classes:
//! - `ScheduleError`: batch preconditions that abort before any work starts
//! - `InputError`: credential files that cannot be zipped into accounts
//! - `StepError`: a single collaborator call for one account
//! - `StoreError`: account storage failures

use questline_common::{IdentityError, Signal};
use thiserror::Error;

/// Fatal preconditions checked by the group scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Account count {total} is not divisible by {group}")]
    BatchSizeNotDivisible { total: usize, group: usize },
}

/// Errors from loading the batch input files.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read input file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input lists have mismatched lengths: {details}")]
    MismatchedLengths { details: String },

    #[error("Invalid account on line {line}: {source}")]
    InvalidAccount {
        line: usize,
        #[source]
        source: IdentityError,
    },
}

/// Errors from one step call. None of these abort the batch.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step {step} returned {signal}: {raw}")]
    Failed {
        step: String,
        signal: Signal,
        raw: serde_json::Value,
    },

    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Referral code still pending after {polls} polls")]
    PendingExhausted { polls: u32 },

    #[error("No referral code issued after {attempts} attempts")]
    CodeUnavailable { attempts: u32 },

    #[error("Cannot consume the placeholder referral code")]
    SentinelCode,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Failed to open session: {0}")]
    Session(String),
}

/// Errors from the account store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No account with key {key}")]
    UnknownAccount { key: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
