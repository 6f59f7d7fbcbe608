use serde::{Deserialize, Serialize};

use crate::account::AccountRecord;

/// A single typed field mutation.
///
/// Progress flags are monotonic: applying `false` to a flag that is already
/// `true` leaves it `true`. `AppendError` only ever grows the error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate {
    SignedIn(bool),
    Registered(bool),
    FollowedAccount(bool),
    HandleLinked(bool),
    OauthLinked(bool),
    CodeConsumed(bool),
    CodeValue(String),
    AppendError(String),
}

impl FieldUpdate {
    /// Storage column targeted by this update.
    pub fn column(&self) -> &'static str {
        match self {
            FieldUpdate::SignedIn(_) => "signed_in",
            FieldUpdate::Registered(_) => "registered",
            FieldUpdate::FollowedAccount(_) => "followed_account",
            FieldUpdate::HandleLinked(_) => "handle_linked",
            FieldUpdate::OauthLinked(_) => "oauth_linked",
            FieldUpdate::CodeConsumed(_) => "code_consumed",
            FieldUpdate::CodeValue(_) => "code_value",
            FieldUpdate::AppendError(_) => "error_log",
        }
    }

    /// Apply to an in-memory record with the same semantics storage uses.
    pub fn apply_to(&self, record: &mut AccountRecord) {
        let progress = &mut record.progress;
        match self {
            FieldUpdate::SignedIn(v) => progress.signed_in |= *v,
            FieldUpdate::Registered(v) => progress.registered |= *v,
            FieldUpdate::FollowedAccount(v) => progress.followed_account |= *v,
            FieldUpdate::HandleLinked(v) => progress.handle_linked |= *v,
            FieldUpdate::OauthLinked(v) => progress.oauth_linked |= *v,
            FieldUpdate::CodeConsumed(v) => record.code_consumed |= *v,
            FieldUpdate::CodeValue(v) => record.code_value = v.clone(),
            FieldUpdate::AppendError(entry) => {
                if !record.error_log.is_empty() {
                    record.error_log.push('\n');
                }
                record.error_log.push_str(entry);
            }
        }
    }
}

/// A batch of field updates for one account, keyed by its private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub private_key: String,
    pub updates: Vec<FieldUpdate>,
}

impl UpdateEvent {
    pub fn new(private_key: impl Into<String>, updates: Vec<FieldUpdate>) -> Self {
        Self {
            private_key: private_key.into(),
            updates,
        }
    }

    pub fn single(private_key: impl Into<String>, update: FieldUpdate) -> Self {
        Self::new(private_key, vec![update])
    }

    /// Apply every update in order. Events for other accounts are ignored.
    pub fn apply_to(&self, record: &mut AccountRecord) {
        if record.private_key != self.private_key {
            return;
        }
        for update in &self.updates {
            update.apply_to(record);
        }
    }
}
