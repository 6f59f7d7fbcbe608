//! Shared domain types for the questline orchestrator.
//!
//! These types cross the boundary between the step runner, the update broker
//! and the account store, so they live in their own crate with no runtime
//! dependencies.

pub mod account;
pub mod outcome;
pub mod update;

pub use account::{AccountRecord, CODE_SENTINEL, IdentityError, NewAccount, Progress};
pub use outcome::{Outcome, Signal};
pub use update::{FieldUpdate, UpdateEvent};
