use std::time::Duration;

use questline_common::Outcome;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::StepError;

/// Bounded retry behaviour for one HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub attempts: u32,
    /// Wait after an HTTP 429.
    pub rate_limit_cooldown: Duration,
    /// Wait after a transport error or 5xx.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            rate_limit_cooldown: Duration::from_secs(60),
            backoff: Duration::from_secs(2),
        }
    }
}

/// Why the last attempt did not produce an outcome.
enum Retryable {
    RateLimited,
    Transport(String),
}

/// Executes JSON POSTs with timeout, rate-limit cooldown and bounded retries.
///
/// The per-request timeout lives on the `reqwest::Client` the executor is
/// built with.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// POST `body` to `url` and decode the response envelope.
    ///
    /// - 2xx with a JSON object body → `Outcome`
    /// - 429 → wait `rate_limit_cooldown`, retry
    /// - 5xx or transport error → wait `backoff`, retry
    /// - other 4xx → `Outcome` when the body carries a status code, else error
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Outcome, StepError> {
        let attempts = self.policy.attempts.max(1);
        let mut last = Retryable::Transport("no attempt made".to_string());

        for attempt in 1..=attempts {
            debug!(url, attempt, "POST");
            let response = match self.client.post(url).json(body).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url, attempt, error = %e, "Request failed");
                    last = Retryable::Transport(e.to_string());
                    self.pause(attempt, attempts, self.policy.backoff).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    url,
                    attempt,
                    cooldown_secs = self.policy.rate_limit_cooldown.as_secs(),
                    "Rate limited"
                );
                last = Retryable::RateLimited;
                self.pause(attempt, attempts, self.policy.rate_limit_cooldown)
                    .await;
                continue;
            }
            if status.is_server_error() {
                warn!(url, attempt, %status, "Server error");
                last = Retryable::Transport(format!("HTTP {status}"));
                self.pause(attempt, attempts, self.policy.backoff).await;
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(url, attempt, error = %e, "Failed to read response body");
                    last = Retryable::Transport(e.to_string());
                    self.pause(attempt, attempts, self.policy.backoff).await;
                    continue;
                }
            };

            return decode_response(status, &text);
        }

        Err(match last {
            Retryable::RateLimited => StepError::RateLimited { attempts },
            Retryable::Transport(message) => StepError::Transport(message),
        })
    }

    async fn pause(&self, attempt: u32, attempts: u32, wait: Duration) {
        if attempt < attempts && !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

fn decode_response(status: StatusCode, text: &str) -> Result<Outcome, StepError> {
    let parsed: Option<Value> = serde_json::from_str(text).ok().filter(Value::is_object);

    if status.is_success() {
        return parsed
            .map(Outcome::from_envelope)
            .ok_or_else(|| StepError::Malformed(truncate(text)));
    }

    match parsed {
        Some(raw) if raw.get("code").and_then(Value::as_str).is_some() => {
            Ok(Outcome::from_envelope(raw))
        }
        _ => Err(StepError::Transport(format!(
            "HTTP {status}: {}",
            truncate(text)
        ))),
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}
