use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use questline_common::{AccountRecord, FieldUpdate, NewAccount, Progress, UpdateEvent};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::errors::StoreError;

/// Shared account store for the update broker and the commands.
///
/// Every async caller goes through `call`, which holds the lock on a
/// blocking thread for the duration of one closure.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<AccountDb>>,
}

impl DbHandle {
    pub fn new(db: AccountDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&AccountDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&*lock(&db)?))
            .await
            .context("Account store task panicked")?
    }

    /// Lock from synchronous code: seeding, status and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, AccountDb>> {
        lock(&self.inner)
    }
}

fn lock(db: &std::sync::Mutex<AccountDb>) -> Result<std::sync::MutexGuard<'_, AccountDb>> {
    db.lock()
        .map_err(|_| anyhow::anyhow!("Account store poisoned by a panicked writer"))
}

/// Aggregate progress counters shown by `questline status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountStats {
    pub total: usize,
    pub signed_in: usize,
    pub registered: usize,
    pub followed_account: usize,
    pub handle_linked: usize,
    pub oauth_linked: usize,
    /// Accounts holding a generated code they have not consumed themselves
    pub codes_generated: usize,
    pub codes_consumed: usize,
    pub complete: usize,
    pub with_errors: usize,
}

const ACCOUNT_COLUMNS: &str = "id, private_key, proxy_url, email, social_handle, auth_token, \
     signed_in, registered, followed_account, handle_linked, oauth_linked, \
     code_consumed, code_value, error_log";

pub struct AccountDb {
    conn: Connection,
}

impl AccountDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    private_key TEXT NOT NULL UNIQUE,
                    proxy_url TEXT NOT NULL,
                    email TEXT NOT NULL DEFAULT '',
                    social_handle TEXT NOT NULL DEFAULT '',
                    auth_token TEXT NOT NULL DEFAULT '',
                    signed_in INTEGER NOT NULL DEFAULT 0,
                    registered INTEGER NOT NULL DEFAULT 0,
                    followed_account INTEGER NOT NULL DEFAULT 0,
                    handle_linked INTEGER NOT NULL DEFAULT 0,
                    oauth_linked INTEGER NOT NULL DEFAULT 0,
                    code_consumed INTEGER NOT NULL DEFAULT 0,
                    code_value TEXT NOT NULL DEFAULT '0',
                    error_log TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );
                ",
            )
            .context("Failed to create accounts table")?;
        Ok(())
    }

    // ── Seeding ───────────────────────────────────────────────────────

    /// Insert a new account unless its private key is already stored.
    ///
    /// Returns `true` when a row was inserted.
    pub fn upsert_if_absent(&self, account: &NewAccount) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO accounts
                 (private_key, proxy_url, email, social_handle, auth_token)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    account.private_key,
                    account.proxy_url,
                    account.email,
                    account.social_handle,
                    account.auth_token
                ],
            )
            .context("Failed to insert account")?;
        Ok(inserted > 0)
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Every stored account in load order.
    pub fn load_all(&self) -> Result<Vec<AccountRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))
            .context("Failed to prepare load_all")?;
        let rows = stmt
            .query_map([], row_to_record)
            .context("Failed to query accounts")?;
        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row.context("Failed to read account row")?);
        }
        Ok(accounts)
    }

    pub fn get(&self, private_key: &str) -> Result<Option<AccountRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE private_key = ?1"),
                params![private_key],
                row_to_record,
            )
            .optional()
            .context("Failed to query account")
    }

    pub fn stats(&self) -> Result<AccountStats> {
        let stats = self
            .conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(signed_in), 0),
                    COALESCE(SUM(registered), 0),
                    COALESCE(SUM(followed_account), 0),
                    COALESCE(SUM(handle_linked), 0),
                    COALESCE(SUM(oauth_linked), 0),
                    COALESCE(SUM(code_consumed = 0 AND code_value != '0'), 0),
                    COALESCE(SUM(code_consumed), 0),
                    COALESCE(SUM(signed_in AND registered AND followed_account
                        AND handle_linked AND oauth_linked
                        AND code_consumed AND code_value != '0'), 0),
                    COALESCE(SUM(error_log != ''), 0)
                 FROM accounts",
                [],
                |row| {
                    Ok(AccountStats {
                        total: row.get::<_, i64>(0)? as usize,
                        signed_in: row.get::<_, i64>(1)? as usize,
                        registered: row.get::<_, i64>(2)? as usize,
                        followed_account: row.get::<_, i64>(3)? as usize,
                        handle_linked: row.get::<_, i64>(4)? as usize,
                        oauth_linked: row.get::<_, i64>(5)? as usize,
                        codes_generated: row.get::<_, i64>(6)? as usize,
                        codes_consumed: row.get::<_, i64>(7)? as usize,
                        complete: row.get::<_, i64>(8)? as usize,
                        with_errors: row.get::<_, i64>(9)? as usize,
                    })
                },
            )
            .context("Failed to compute account stats")?;
        Ok(stats)
    }

    // ── Writes ────────────────────────────────────────────────────────

    /// Apply every field update of `event` in one transaction.
    ///
    /// Progress flags only ever move from false to true, and error entries
    /// are appended to the existing log.
    pub fn apply_update(&self, event: &UpdateEvent) -> Result<(), StoreError> {
        // Writers are serialised by the DbHandle lock.
        let tx = self.conn.unchecked_transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM accounts WHERE private_key = ?1",
                params![event.private_key],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownAccount {
                key: event.private_key.clone(),
            });
        }

        for update in &event.updates {
            apply_field(&tx, &event.private_key, update)?;
        }
        tx.execute(
            "UPDATE accounts SET updated_at = datetime('now') WHERE private_key = ?1",
            params![event.private_key],
        )?;

        tx.commit()?;
        Ok(())
    }
}

fn apply_field(
    conn: &Connection,
    private_key: &str,
    update: &FieldUpdate,
) -> Result<(), rusqlite::Error> {
    let column = update.column();
    match update {
        FieldUpdate::SignedIn(v)
        | FieldUpdate::Registered(v)
        | FieldUpdate::FollowedAccount(v)
        | FieldUpdate::HandleLinked(v)
        | FieldUpdate::OauthLinked(v)
        | FieldUpdate::CodeConsumed(v) => {
            conn.execute(
                &format!("UPDATE accounts SET {column} = MAX({column}, ?1) WHERE private_key = ?2"),
                params![*v, private_key],
            )?;
        }
        FieldUpdate::CodeValue(code) => {
            conn.execute(
                "UPDATE accounts SET code_value = ?1 WHERE private_key = ?2",
                params![code, private_key],
            )?;
        }
        FieldUpdate::AppendError(entry) => {
            conn.execute(
                "UPDATE accounts SET error_log = CASE
                    WHEN error_log = '' THEN ?1
                    ELSE error_log || char(10) || ?1
                 END
                 WHERE private_key = ?2",
                params![entry, private_key],
            )?;
        }
    }
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        id: row.get(0)?,
        private_key: row.get(1)?,
        proxy_url: row.get(2)?,
        email: row.get(3)?,
        social_handle: row.get(4)?,
        auth_token: row.get(5)?,
        progress: Progress {
            signed_in: row.get(6)?,
            registered: row.get(7)?,
            followed_account: row.get(8)?,
            handle_linked: row.get(9)?,
            oauth_linked: row.get(10)?,
        },
        code_consumed: row.get(11)?,
        code_value: row.get(12)?,
        error_log: row.get(13)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────
