use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status literal the remote service uses for a successful call.
const SUCCESS_STATUS: &str = "SUCCESS";
/// Status literal the remote service returns while a confirmation is not final.
const FAILURE_STATUS: &str = "FAILURE";

/// Tri-state result signal of one collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Success,
    /// Not final yet; the caller may poll again.
    Pending,
    Failure,
}

impl Signal {
    /// Classify the envelope's `code` field.
    ///
    /// A missing, empty or `FAILURE` status is treated as pending because the
    /// service reports unconfirmed referral submissions that way.
    pub fn from_status(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some(SUCCESS_STATUS) => Signal::Success,
            None | Some("") | Some(FAILURE_STATUS) => Signal::Pending,
            Some(_) => Signal::Failure,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Success => write!(f, "success"),
            Signal::Pending => write!(f, "pending"),
            Signal::Failure => write!(f, "failure"),
        }
    }
}

/// Result of a single step call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub signal: Signal,
    /// The `data` part of the response, if any.
    pub payload: Value,
    /// The whole decoded response, kept for diagnostics.
    pub raw: Value,
}

impl Outcome {
    /// Decode a `{"code": ..., "data": ...}` response envelope.
    pub fn from_envelope(raw: Value) -> Self {
        let signal = Signal::from_status(raw.get("code").and_then(Value::as_str));
        let payload = raw.get("data").cloned().unwrap_or(Value::Null);
        Self {
            signal,
            payload,
            raw,
        }
    }

    pub fn success(payload: Value) -> Self {
        Self {
            signal: Signal::Success,
            raw: serde_json::json!({ "code": SUCCESS_STATUS, "data": payload.clone() }),
            payload,
        }
    }

    pub fn pending() -> Self {
        Self {
            signal: Signal::Pending,
            payload: Value::Null,
            raw: serde_json::json!({ "code": FAILURE_STATUS }),
        }
    }

    pub fn failure(status: &str) -> Self {
        Self {
            signal: Signal::Failure,
            payload: Value::Null,
            raw: serde_json::json!({ "code": status }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.signal == Signal::Success
    }

    /// The payload as a trimmed string, if it is a non-empty string.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
