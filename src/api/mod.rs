//! Collaborator seam between the step state machine and the remote service.
//!
//! `StepApi` is one account's session: every method performs exactly one
//! logical call and reports a tri-state `Outcome`. `SessionFactory` opens a
//! fresh session per job so that HTTP clients, cookie jars and proxies are
//! never shared between accounts.

pub mod http;
pub mod retry;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use questline_common::{AccountRecord, Outcome};

use crate::errors::StepError;

pub use http::{ApiSettings, HttpSessionFactory, HttpStepApi, account_fingerprint};
pub use retry::{RequestExecutor, RetryPolicy};

/// The seven remote operations of the quest workflow.
#[async_trait]
pub trait StepApi: Send + Sync {
    async fn sign_in(&self) -> Result<Outcome, StepError>;

    async fn register(&self, email: &str) -> Result<Outcome, StepError>;

    async fn follow(&self) -> Result<Outcome, StepError>;

    async fn link_handle(&self, handle: &str) -> Result<Outcome, StepError>;

    async fn link_oauth(&self, token: &str) -> Result<Outcome, StepError>;

    /// Ask the service for a referral code owned by this account.
    ///
    /// On success the code is the outcome's string payload.
    async fn generate_code(&self) -> Result<Outcome, StepError>;

    /// Submit another account's referral code.
    async fn consume_code(&self, code: &str) -> Result<Outcome, StepError>;
}

/// Opens an isolated `StepApi` session for one account.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, account: &AccountRecord) -> Result<Box<dyn StepApi>, StepError>;
}
