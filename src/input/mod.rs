//! Batch credential loading.
//!
//! A batch is described by five newline-delimited files in the input
//! directory. Line *i* of each file belongs to the same account.

use std::path::{Path, PathBuf};

use anyhow::Result;
use questline_common::NewAccount;
use tracing::{debug, info};

use crate::errors::InputError;
use crate::store::AccountDb;

pub const PRIVATE_KEYS_FILE: &str = "private_keys.txt";
pub const PROXIES_FILE: &str = "proxies.txt";
pub const EMAILS_FILE: &str = "emails.txt";
pub const HANDLES_FILE: &str = "handles.txt";
pub const TOKENS_FILE: &str = "tokens.txt";

/// All input files in the order their columns are zipped.
pub const INPUT_FILES: [&str; 5] = [
    PRIVATE_KEYS_FILE,
    PROXIES_FILE,
    EMAILS_FILE,
    HANDLES_FILE,
    TOKENS_FILE,
];

/// Counts reported after seeding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Read non-blank, trimmed lines from `path`.
pub fn read_lines(path: &Path) -> Result<Vec<String>, InputError> {
    let content = std::fs::read_to_string(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Read the five list files under `dir` and zip them into accounts.
pub fn load_batch(dir: &Path) -> Result<Vec<NewAccount>, InputError> {
    let mut columns = Vec::with_capacity(INPUT_FILES.len());
    for name in INPUT_FILES {
        let path: PathBuf = dir.join(name);
        let lines = read_lines(&path)?;
        debug!(file = name, lines = lines.len(), "Read input file");
        columns.push((name, lines));
    }

    let expected = columns[0].1.len();
    if columns.iter().any(|(_, lines)| lines.len() != expected) {
        let details = columns
            .iter()
            .map(|(name, lines)| format!("{name}={}", lines.len()))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(InputError::MismatchedLengths { details });
    }

    let [keys, proxies, emails, handles, tokens] = columns_array(columns);
    (0..expected)
        .map(|i| {
            NewAccount::new(&keys[i], &proxies[i], &emails[i], &handles[i], &tokens[i])
                .map_err(|source| InputError::InvalidAccount { line: i + 1, source })
        })
        .collect()
}

fn columns_array(columns: Vec<(&str, Vec<String>)>) -> [Vec<String>; 5] {
    let mut iter = columns.into_iter().map(|(_, lines)| lines);
    std::array::from_fn(|_| iter.next().unwrap_or_default())
}

/// Load the batch from `dir` and insert accounts that are not stored yet.
///
/// The whole batch is validated before anything is written.
pub fn seed_accounts(dir: &Path, db: &AccountDb) -> Result<SeedReport> {
    let accounts = load_batch(dir)?;
    let mut report = SeedReport::default();
    for account in &accounts {
        if db.upsert_if_absent(account)? {
            report.inserted += 1;
        } else {
            report.skipped += 1;
        }
    }
    info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "Seeded accounts"
    );
    Ok(report)
}
