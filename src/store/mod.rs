//! Account persistence.
//!
//! One SQLite table holds every wallet's identity, progress flags and
//! referral state. Reads happen once per batch; all writes go through the
//! update broker.

pub mod db;

pub use db::{AccountDb, AccountStats, DbHandle};
