use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value of `code_value` before any code has been generated or consumed.
pub const CODE_SENTINEL: &str = "0";

/// Length of a `0x`-prefixed 32-byte hex private key.
const PRIVATE_KEY_LEN: usize = 66;

/// Errors raised while normalising account identity fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("private key must be {expected} characters including 0x prefix, got {actual}")]
    BadKeyLength { expected: usize, actual: usize },

    #[error("private key contains non-hex characters")]
    NonHexKey,

    #[error("proxy url is empty")]
    EmptyProxy,
}

/// Per-step progress flags. Once a flag is true it never goes back to false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub signed_in: bool,
    pub registered: bool,
    pub followed_account: bool,
    pub handle_linked: bool,
    pub oauth_linked: bool,
}

impl Progress {
    /// True when every step before the referral exchange has succeeded.
    pub fn all_done(&self) -> bool {
        self.signed_in
            && self.registered
            && self.followed_account
            && self.handle_linked
            && self.oauth_linked
    }
}

/// Identity fields for an account that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub private_key: String,
    pub proxy_url: String,
    pub email: String,
    pub social_handle: String,
    pub auth_token: String,
}

impl NewAccount {
    /// Build a new account, normalising the key and proxy.
    pub fn new(
        private_key: &str,
        proxy_url: &str,
        email: &str,
        social_handle: &str,
        auth_token: &str,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            private_key: normalize_private_key(private_key)?,
            proxy_url: normalize_proxy_url(proxy_url)?,
            email: email.trim().to_string(),
            social_handle: social_handle.trim().to_string(),
            auth_token: auth_token.trim().to_string(),
        })
    }
}

/// Stored progress for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Storage row id; doubles as load order and the visible display id.
    pub id: i64,
    pub private_key: String,
    pub proxy_url: String,
    pub email: String,
    pub social_handle: String,
    pub auth_token: String,
    #[serde(flatten)]
    pub progress: Progress,
    pub code_consumed: bool,
    pub code_value: String,
    pub error_log: String,
}

impl AccountRecord {
    /// A freshly seeded record with no progress.
    pub fn fresh(id: i64, account: NewAccount) -> Self {
        Self {
            id,
            private_key: account.private_key,
            proxy_url: account.proxy_url,
            email: account.email,
            social_handle: account.social_handle,
            auth_token: account.auth_token,
            progress: Progress::default(),
            code_consumed: false,
            code_value: CODE_SENTINEL.to_string(),
            error_log: String::new(),
        }
    }

    /// Whether `code_value` holds a real code (generated or consumed).
    pub fn has_code(&self) -> bool {
        self.code_value != CODE_SENTINEL
    }

    /// All flags set and a foreign code consumed.
    pub fn is_complete(&self) -> bool {
        self.progress.all_done() && self.code_consumed && self.has_code()
    }

    /// Identifier used in log lines; `"***"` when masking is requested.
    pub fn display_id(&self, mask: bool) -> String {
        if mask {
            "***".to_string()
        } else {
            self.id.to_string()
        }
    }
}

/// Prefix `0x` when missing and check length and hex digits.
pub fn normalize_private_key(raw: &str) -> Result<String, IdentityError> {
    let trimmed = raw.trim();
    let key = if trimmed.starts_with("0x") {
        trimmed.to_string()
    } else {
        format!("0x{trimmed}")
    };

    if key.len() != PRIVATE_KEY_LEN {
        return Err(IdentityError::BadKeyLength {
            expected: PRIVATE_KEY_LEN,
            actual: key.len(),
        });
    }
    if !key[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdentityError::NonHexKey);
    }
    Ok(key)
}

/// Prefix `http://` when the proxy has no scheme.
pub fn normalize_proxy_url(raw: &str) -> Result<String, IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::EmptyProxy);
    }
    if trimmed.starts_with("http") || trimmed.starts_with("socks") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("http://{trimmed}"))
    }
}
