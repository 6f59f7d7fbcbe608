//! Per-account step state machine.
//!
//! An account walks `SignIn → Register → Follow → LinkHandle → LinkOauth →
//! CodeExchange` in strict order. Each step is gated by a guard over the
//! stored record; a satisfied guard skips the step, which is what makes
//! interrupted runs resumable. Every success is persisted through the
//! update broker before the next step starts.

use std::sync::Arc;

use questline_common::{AccountRecord, CODE_SENTINEL, FieldUpdate, Outcome, Signal, UpdateEvent};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::api::StepApi;
use crate::broker::UpdateSender;
use crate::errors::StepError;
use crate::quest_config::DelayRange;

/// One stage of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    SignIn,
    Register,
    Follow,
    LinkHandle,
    LinkOauth,
    CodeExchange,
}

impl Step {
    /// Execution order.
    pub const ORDER: [Step; 6] = [
        Step::SignIn,
        Step::Register,
        Step::Follow,
        Step::LinkHandle,
        Step::LinkOauth,
        Step::CodeExchange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::SignIn => "sign_in",
            Step::Register => "register",
            Step::Follow => "follow",
            Step::LinkHandle => "link_handle",
            Step::LinkOauth => "link_oauth",
            Step::CodeExchange => "code_exchange",
        }
    }

    /// Guard: true when the step has nothing left to do for `record`.
    pub fn is_done(&self, record: &AccountRecord, mode: &RunMode) -> bool {
        let progress = &record.progress;
        match self {
            Step::SignIn => progress.signed_in,
            Step::Register => progress.registered,
            Step::Follow => progress.followed_account,
            Step::LinkHandle => progress.handle_linked,
            Step::LinkOauth => progress.oauth_linked,
            Step::CodeExchange => match mode {
                RunMode::Seed => record.code_consumed || record.has_code(),
                RunMode::Dependent { .. } => record.code_consumed,
            },
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of the account in its referral group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Generate a code for others to consume.
    Seed,
    /// Consume the given code.
    Dependent { code: String },
}

/// Pacing and referral limits for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Jitter before each executed step and between code requests
    pub step_delay: DelayRange,
    /// Wait before a dependent first submits its code
    pub code_cooldown: DelayRange,
    /// Wait between polls of a pending submission
    pub pending_backoff: DelayRange,
    pub max_pending_polls: u32,
    pub max_code_attempts: u32,
    /// Log `***` instead of the account id
    pub mask_ids: bool,
}

impl RunnerConfig {
    /// No delays at all. Used by tests and dry runs against local services.
    pub fn immediate() -> Self {
        Self {
            step_delay: DelayRange::zero(),
            code_cooldown: DelayRange::zero(),
            pending_backoff: DelayRange::zero(),
            max_pending_polls: 3,
            max_code_attempts: 3,
            mask_ids: false,
        }
    }
}

async fn pause(range: &DelayRange) {
    let wait = range.sample();
    if !wait.is_zero() {
        debug!(secs = wait.as_secs_f64(), "Sleeping");
        tokio::time::sleep(wait).await;
    }
}

/// Drives one account through the workflow over one session.
pub struct StepRunner {
    api: Box<dyn StepApi>,
    updates: UpdateSender,
    config: Arc<RunnerConfig>,
}

impl StepRunner {
    pub fn new(api: Box<dyn StepApi>, updates: UpdateSender, config: Arc<RunnerConfig>) -> Self {
        Self {
            api,
            updates,
            config,
        }
    }

    /// Run every outstanding step for `account`.
    ///
    /// Returns the account's code on success (the generated code for a seed,
    /// the consumed code for a dependent) and `None` when a step failed or
    /// the account was already complete. Failures are logged and appended to
    /// the account's error log; they never propagate.
    pub async fn run(&self, account: &AccountRecord, mode: &RunMode) -> Option<String> {
        let span = info_span!("account", id = %account.display_id(self.config.mask_ids));
        self.run_inner(account, mode).instrument(span).await
    }

    async fn run_inner(&self, account: &AccountRecord, mode: &RunMode) -> Option<String> {
        if account.is_complete() {
            debug!("Account already complete");
            return None;
        }

        let mut state = account.clone();
        for step in Step::ORDER {
            if step.is_done(&state, mode) {
                debug!(%step, "Guard satisfied, skipping");
                continue;
            }

            pause(&self.config.step_delay).await;
            match self.execute(step, &mut state, mode).await {
                Ok(()) => info!(%step, "Step completed"),
                Err(e) => {
                    error!(%step, error = %e, "Step failed");
                    let entry = format!(
                        "[{}] {step}: {e}",
                        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
                    );
                    self.emit(&mut state, vec![FieldUpdate::AppendError(entry)])
                        .await;
                    return None;
                }
            }
        }

        state.has_code().then(|| state.code_value.clone())
    }

    async fn execute(
        &self,
        step: Step,
        state: &mut AccountRecord,
        mode: &RunMode,
    ) -> Result<(), StepError> {
        let api = self.api.as_ref();
        let update = match step {
            Step::SignIn => {
                require_success(step, api.sign_in().await?)?;
                FieldUpdate::SignedIn(true)
            }
            Step::Register => {
                require_success(step, api.register(&state.email).await?)?;
                FieldUpdate::Registered(true)
            }
            Step::Follow => {
                require_success(step, api.follow().await?)?;
                FieldUpdate::FollowedAccount(true)
            }
            Step::LinkHandle => {
                require_success(step, api.link_handle(&state.social_handle).await?)?;
                FieldUpdate::HandleLinked(true)
            }
            Step::LinkOauth => {
                require_success(step, api.link_oauth(&state.auth_token).await?)?;
                FieldUpdate::OauthLinked(true)
            }
            Step::CodeExchange => {
                let updates = match mode {
                    RunMode::Seed => vec![FieldUpdate::CodeValue(self.generate_code().await?)],
                    RunMode::Dependent { code } => {
                        self.consume_code(code).await?;
                        vec![
                            FieldUpdate::CodeConsumed(true),
                            FieldUpdate::CodeValue(code.clone()),
                        ]
                    }
                };
                self.emit(state, updates).await;
                return Ok(());
            }
        };
        self.emit(state, vec![update]).await;
        Ok(())
    }

    /// Request codes until one is issued or attempts run out.
    async fn generate_code(&self) -> Result<String, StepError> {
        let attempts = self.config.max_code_attempts.max(1);
        for attempt in 1..=attempts {
            let outcome = self.api.generate_code().await?;
            if outcome.is_success()
                && let Some(code) = outcome.payload_str()
            {
                info!(attempt, "Referral code issued");
                return Ok(code.to_string());
            }
            if outcome.signal == Signal::Failure {
                return Err(failed(Step::CodeExchange, outcome));
            }
            warn!(attempt, "No referral code issued yet");
            if attempt < attempts {
                pause(&self.config.step_delay).await;
            }
        }
        Err(StepError::CodeUnavailable { attempts })
    }

    /// Submit `code`, re-submitting while the service reports it pending.
    async fn consume_code(&self, code: &str) -> Result<(), StepError> {
        if code == CODE_SENTINEL {
            return Err(StepError::SentinelCode);
        }

        pause(&self.config.code_cooldown).await;
        let polls = self.config.max_pending_polls.max(1);
        for poll in 1..=polls {
            let outcome = self.api.consume_code(code).await?;
            match outcome.signal {
                Signal::Success => return Ok(()),
                Signal::Failure => {
                    return Err(failed(Step::CodeExchange, outcome));
                }
                Signal::Pending => {
                    warn!(poll, "Referral code submission pending");
                    if poll < polls {
                        pause(&self.config.pending_backoff).await;
                    }
                }
            }
        }
        Err(StepError::PendingExhausted { polls })
    }

    async fn emit(&self, state: &mut AccountRecord, updates: Vec<FieldUpdate>) {
        let event = UpdateEvent::new(state.private_key.clone(), updates);
        event.apply_to(state);
        self.updates.enqueue(event).await;
    }
}

fn require_success(step: Step, outcome: Outcome) -> Result<(), StepError> {
    if outcome.is_success() {
        Ok(())
    } else {
        Err(failed(step, outcome))
    }
}

fn failed(step: Step, outcome: Outcome) -> StepError {
    StepError::Failed {
        step: step.name().to_string(),
        signal: outcome.signal,
        raw: outcome.raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::*;
    use questline_common::{NewAccount, Progress};
    use tokio::sync::mpsc;

    fn account(id: i64) -> AccountRecord {
        let key = format!("{:064x}", id);
        let new = NewAccount::new(&key, "127.0.0.1:1", "q@mail.test", "quester", "tok").unwrap();
        AccountRecord::fresh(id, new)
    }

    struct Harness {
        runner: StepRunner,
        events: mpsc::Receiver<UpdateEvent>,
        calls: CallLog,
    }

    fn harness(account: &AccountRecord, script: Script, config: RunnerConfig) -> Harness {
        let sessions = ScriptedSessions::new().with_default(script);
        let calls = sessions.calls();
        let api = Box::new(sessions.api_for(account));
        let (tx, events) = mpsc::channel(64);
        Harness {
            runner: StepRunner::new(api, UpdateSender::new(tx), Arc::new(config)),
            events,
            calls,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<UpdateEvent>) -> Vec<FieldUpdate> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.extend(event.updates);
        }
        out
    }

    fn all_flags() -> Progress {
        Progress {
            signed_in: true,
            registered: true,
            followed_account: true,
            handle_linked: true,
            oauth_linked: true,
        }
    }

    #[tokio::test]
    async fn test_seed_runs_every_step_and_returns_code() {
        let acc = account(1);
        let mut h = harness(&acc, Script::with_code("ABC123"), RunnerConfig::immediate());

        let result = h.runner.run(&acc, &RunMode::Seed).await;
        assert_eq!(result.as_deref(), Some("ABC123"));
        assert_eq!(
            steps_for(&h.calls, 1),
            vec![SIGN_IN, REGISTER, FOLLOW, LINK_HANDLE, LINK_OAUTH, GENERATE_CODE]
        );

        let updates = drain(&mut h.events);
        assert_eq!(
            updates,
            vec![
                FieldUpdate::SignedIn(true),
                FieldUpdate::Registered(true),
                FieldUpdate::FollowedAccount(true),
                FieldUpdate::HandleLinked(true),
                FieldUpdate::OauthLinked(true),
                FieldUpdate::CodeValue("ABC123".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_steps_receive_account_fields() {
        let acc = account(2);
        let h = harness(&acc, Script::default(), RunnerConfig::immediate());
        h.runner.run(&acc, &RunMode::Seed).await;

        let calls = calls_for(&h.calls, 2);
        assert_eq!(calls[1].arg.as_deref(), Some("q@mail.test"));
        assert_eq!(calls[3].arg.as_deref(), Some("quester"));
        assert_eq!(calls[4].arg.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_satisfied_guards_are_never_invoked() {
        let mut acc = account(3);
        acc.progress.signed_in = true;
        acc.progress.registered = true;
        let mut h = harness(&acc, Script::default(), RunnerConfig::immediate());

        h.runner.run(&acc, &RunMode::Seed).await;
        let steps = steps_for(&h.calls, 3);
        assert!(!steps.contains(&SIGN_IN));
        assert!(!steps.contains(&REGISTER));
        assert_eq!(steps[0], FOLLOW);
        assert!(!drain(&mut h.events).contains(&FieldUpdate::SignedIn(true)));
    }

    #[tokio::test]
    async fn test_complete_account_is_noop() {
        let mut acc = account(4);
        acc.progress = all_flags();
        acc.code_consumed = true;
        acc.code_value = "XYZ".into();
        let mut h = harness(&acc, Script::default(), RunnerConfig::immediate());

        for _ in 0..3 {
            assert_eq!(h.runner.run(&acc, &RunMode::Seed).await, None);
            let mode = RunMode::Dependent { code: "XYZ".into() };
            assert_eq!(h.runner.run(&acc, &mode).await, None);
        }
        assert!(h.calls.lock().unwrap().is_empty());
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_seed_with_stored_code_skips_generation() {
        let mut acc = account(5);
        acc.progress = all_flags();
        acc.code_value = "KEPT".into();
        let h = harness(&acc, Script::default(), RunnerConfig::immediate());

        assert_eq!(h.runner.run(&acc, &RunMode::Seed).await.as_deref(), Some("KEPT"));
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_appends_error_and_stops() {
        let acc = account(6);
        let mut h = harness(&acc, Script::failing(FOLLOW), RunnerConfig::immediate());

        assert_eq!(h.runner.run(&acc, &RunMode::Seed).await, None);
        assert_eq!(steps_for(&h.calls, 6), vec![SIGN_IN, REGISTER, FOLLOW]);

        let updates = drain(&mut h.events);
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0], FieldUpdate::SignedIn(true));
        assert_eq!(updates[1], FieldUpdate::Registered(true));
        match &updates[2] {
            FieldUpdate::AppendError(entry) => {
                assert!(entry.contains("follow"));
                assert!(entry.contains("DENIED"));
            }
            other => panic!("Expected AppendError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_caught() {
        let acc = account(7);
        let mut h = harness(&acc, Script::erroring(SIGN_IN), RunnerConfig::immediate());

        assert_eq!(h.runner.run(&acc, &RunMode::Seed).await, None);
        let updates = drain(&mut h.events);
        assert!(matches!(&updates[..], [FieldUpdate::AppendError(e)] if e.contains("Transport")));
    }

    #[tokio::test]
    async fn test_seed_retries_empty_codes() {
        let acc = account(8);
        let script = Script {
            empty_codes: 2,
            generated_code: Some("LATE".into()),
            ..Default::default()
        };
        let h = harness(&acc, script, RunnerConfig::immediate());

        assert_eq!(h.runner.run(&acc, &RunMode::Seed).await.as_deref(), Some("LATE"));
        let generates = steps_for(&h.calls, 8)
            .into_iter()
            .filter(|s| *s == GENERATE_CODE)
            .count();
        assert_eq!(generates, 3);
    }

    #[tokio::test]
    async fn test_seed_code_attempts_are_bounded() {
        let acc = account(9);
        let script = Script {
            empty_codes: 10,
            ..Default::default()
        };
        let mut h = harness(&acc, script, RunnerConfig::immediate());

        assert_eq!(h.runner.run(&acc, &RunMode::Seed).await, None);
        let updates = drain(&mut h.events);
        assert!(matches!(
            updates.last(),
            Some(FieldUpdate::AppendError(e)) if e.contains("No referral code issued after 3 attempts")
        ));
    }

    #[tokio::test]
    async fn test_dependent_consumes_supplied_code() {
        let acc = account(10);
        let mut h = harness(&acc, Script::default(), RunnerConfig::immediate());
        let mode = RunMode::Dependent {
            code: "ABC123".into(),
        };

        assert_eq!(h.runner.run(&acc, &mode).await.as_deref(), Some("ABC123"));
        let calls = calls_for(&h.calls, 10);
        let last = calls.last().unwrap();
        assert_eq!(last.step, CONSUME_CODE);
        assert_eq!(last.arg.as_deref(), Some("ABC123"));
        assert!(!calls.iter().any(|c| c.step == GENERATE_CODE));

        let updates = drain(&mut h.events);
        assert!(updates.ends_with(&[
            FieldUpdate::CodeConsumed(true),
            FieldUpdate::CodeValue("ABC123".into()),
        ]));
    }

    #[tokio::test]
    async fn test_dependent_polls_pending_then_succeeds() {
        let mut acc = account(11);
        acc.progress = all_flags();
        let script = Script {
            pending_consumes: 2,
            ..Default::default()
        };
        let h = harness(&acc, script, RunnerConfig::immediate());
        let mode = RunMode::Dependent { code: "P1".into() };

        assert_eq!(h.runner.run(&acc, &mode).await.as_deref(), Some("P1"));
        assert_eq!(
            steps_for(&h.calls, 11),
            vec![CONSUME_CODE, CONSUME_CODE, CONSUME_CODE]
        );
    }

    #[tokio::test]
    async fn test_dependent_pending_exhausted() {
        let mut acc = account(12);
        acc.progress = all_flags();
        let script = Script {
            pending_consumes: 10,
            ..Default::default()
        };
        let mut h = harness(&acc, script, RunnerConfig::immediate());
        let mode = RunMode::Dependent { code: "P1".into() };

        assert_eq!(h.runner.run(&acc, &mode).await, None);
        assert_eq!(steps_for(&h.calls, 12).len(), 3);
        let updates = drain(&mut h.events);
        assert!(matches!(
            &updates[..],
            [FieldUpdate::AppendError(e)] if e.contains("pending after 3 polls")
        ));
    }

    #[tokio::test]
    async fn test_dependent_sentinel_code_fails_without_call() {
        let mut acc = account(13);
        acc.progress = all_flags();
        let mut h = harness(&acc, Script::default(), RunnerConfig::immediate());
        let mode = RunMode::Dependent {
            code: CODE_SENTINEL.into(),
        };

        assert_eq!(h.runner.run(&acc, &mode).await, None);
        assert!(h.calls.lock().unwrap().is_empty());
        let updates = drain(&mut h.events);
        assert!(matches!(
            &updates[..],
            [FieldUpdate::AppendError(e)] if e.contains("placeholder")
        ));
    }

    #[tokio::test]
    async fn test_dependent_already_consumed_is_skipped() {
        let mut acc = account(14);
        acc.progress.signed_in = true;
        acc.code_consumed = true;
        acc.code_value = "OLD".into();
        let h = harness(&acc, Script::default(), RunnerConfig::immediate());
        let mode = RunMode::Dependent { code: "NEW".into() };

        h.runner.run(&acc, &mode).await;
        assert!(!steps_for(&h.calls, 14).contains(&CONSUME_CODE));
    }

    fn count(calls: &CallLog, id: i64, step: &str) -> usize {
        steps_for(calls, id).into_iter().filter(|s| *s == step).count()
    }

    #[tokio::test]
    async fn test_seed_generation_failure_is_not_retried() {
        let mut acc = account(15);
        acc.progress = all_flags();
        let config = RunnerConfig {
            max_code_attempts: 5,
            ..RunnerConfig::immediate()
        };
        let mut h = harness(&acc, Script::failing(GENERATE_CODE), config);

        assert_eq!(h.runner.run(&acc, &RunMode::Seed).await, None);
        assert_eq!(count(&h.calls, 15, GENERATE_CODE), 1);
        let updates = drain(&mut h.events);
        assert!(matches!(
            &updates[..],
            [FieldUpdate::AppendError(e)] if e.contains("code_exchange") && e.contains("DENIED")
        ));
    }

    #[tokio::test]
    async fn test_dependent_rejected_code_stops_polling() {
        let mut acc = account(16);
        acc.progress = all_flags();
        let script = Script {
            rejected_codes: ["BAD1".to_string()].into(),
            ..Default::default()
        };
        let config = RunnerConfig {
            max_pending_polls: 5,
            ..RunnerConfig::immediate()
        };
        let mut h = harness(&acc, script, config);
        let mode = RunMode::Dependent { code: "BAD1".into() };

        assert_eq!(h.runner.run(&acc, &mode).await, None);
        assert_eq!(count(&h.calls, 16, CONSUME_CODE), 1);
        let updates = drain(&mut h.events);
        assert!(!updates.contains(&FieldUpdate::CodeConsumed(true)));
        assert!(matches!(
            &updates[..],
            [FieldUpdate::AppendError(e)] if e.contains("code_exchange") && e.contains("INVALID_CODE")
        ));
    }

    #[tokio::test]
    async fn test_dependent_consume_failure_leaves_code_unconsumed() {
        let mut acc = account(17);
        acc.progress = all_flags();
        let script = Script {
            pending_consumes: 2,
            ..Script::failing(CONSUME_CODE)
        };
        let mut h = harness(&acc, script, RunnerConfig::immediate());
        let mode = RunMode::Dependent { code: "C17".into() };

        assert_eq!(h.runner.run(&acc, &mode).await, None);
        assert_eq!(steps_for(&h.calls, 17), vec![CONSUME_CODE]);
        let updates = drain(&mut h.events);
        assert_eq!(updates.len(), 1);
        assert!(matches!(&updates[0], FieldUpdate::AppendError(_)));
    }

    #[test]
    fn test_guard_table_order() {
        let names: Vec<_> = Step::ORDER.iter().map(Step::name).collect();
        assert_eq!(
            names,
            vec![
                "sign_in",
                "register",
                "follow",
                "link_handle",
                "link_oauth",
                "code_exchange"
            ]
        );
    }

    #[test]
    fn test_code_exchange_guard_depends_on_mode() {
        let mut acc = account(15);
        acc.code_value = "GEN".into();
        let seed = RunMode::Seed;
        let dependent = RunMode::Dependent { code: "X".into() };
        assert!(Step::CodeExchange.is_done(&acc, &seed));
        assert!(!Step::CodeExchange.is_done(&acc, &dependent));

        acc.code_consumed = true;
        assert!(Step::CodeExchange.is_done(&acc, &dependent));
    }
}
