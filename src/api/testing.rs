//! Scripted in-memory sessions for state machine and scheduling tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use questline_common::{AccountRecord, Outcome};
use serde_json::json;

use super::{SessionFactory, StepApi};
use crate::errors::StepError;

pub const SIGN_IN: &str = "sign_in";
pub const REGISTER: &str = "register";
pub const FOLLOW: &str = "follow";
pub const LINK_HANDLE: &str = "link_handle";
pub const LINK_OAUTH: &str = "link_oauth";
pub const GENERATE_CODE: &str = "generate_code";
pub const CONSUME_CODE: &str = "consume_code";

/// How one account's session answers.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Calls answered with a `Failure` outcome
    pub failing: HashSet<&'static str>,
    /// Calls answered with a transport error
    pub erroring: HashSet<&'static str>,
    /// Call that panics
    pub panic_on: Option<&'static str>,
    /// Code returned by `generate_code`; defaults to `CODE<id>`
    pub generated_code: Option<String>,
    /// Empty `generate_code` responses before the code is issued
    pub empty_codes: u32,
    /// `Pending` responses to `consume_code` before success
    pub pending_consumes: u32,
    /// Codes `consume_code` rejects with `Failure`
    pub rejected_codes: HashSet<String>,
}

impl Script {
    pub fn failing(step: &'static str) -> Self {
        Self {
            failing: HashSet::from([step]),
            ..Default::default()
        }
    }

    pub fn erroring(step: &'static str) -> Self {
        Self {
            erroring: HashSet::from([step]),
            ..Default::default()
        }
    }

    pub fn with_code(code: &str) -> Self {
        Self {
            generated_code: Some(code.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub account_id: i64,
    pub step: &'static str,
    pub arg: Option<String>,
}

pub type CallLog = Arc<Mutex<Vec<RecordedCall>>>;

pub struct ScriptedApi {
    account_id: i64,
    script: Script,
    calls: CallLog,
    empty_codes_left: AtomicU32,
    pending_left: AtomicU32,
}

impl ScriptedApi {
    pub fn new(account_id: i64, script: Script, calls: CallLog) -> Self {
        Self {
            account_id,
            empty_codes_left: AtomicU32::new(script.empty_codes),
            pending_left: AtomicU32::new(script.pending_consumes),
            script,
            calls,
        }
    }

    fn record(&self, step: &'static str, arg: Option<&str>) -> Result<(), StepError> {
        self.calls.lock().unwrap().push(RecordedCall {
            account_id: self.account_id,
            step,
            arg: arg.map(String::from),
        });
        if self.script.panic_on == Some(step) {
            panic!("scripted panic in {step}");
        }
        if self.script.erroring.contains(step) {
            return Err(StepError::Transport(format!("scripted error in {step}")));
        }
        Ok(())
    }

    fn answer(&self, step: &'static str, arg: Option<&str>) -> Result<Outcome, StepError> {
        self.record(step, arg)?;
        if self.script.failing.contains(step) {
            return Ok(Outcome::failure("DENIED"));
        }
        Ok(Outcome::success(json!(null)))
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl StepApi for ScriptedApi {
    async fn sign_in(&self) -> Result<Outcome, StepError> {
        self.answer(SIGN_IN, None)
    }

    async fn register(&self, email: &str) -> Result<Outcome, StepError> {
        self.answer(REGISTER, Some(email))
    }

    async fn follow(&self) -> Result<Outcome, StepError> {
        self.answer(FOLLOW, None)
    }

    async fn link_handle(&self, handle: &str) -> Result<Outcome, StepError> {
        self.answer(LINK_HANDLE, Some(handle))
    }

    async fn link_oauth(&self, token: &str) -> Result<Outcome, StepError> {
        self.answer(LINK_OAUTH, Some(token))
    }

    async fn generate_code(&self) -> Result<Outcome, StepError> {
        self.record(GENERATE_CODE, None)?;
        if self.script.failing.contains(GENERATE_CODE) {
            return Ok(Outcome::failure("DENIED"));
        }
        if take_one(&self.empty_codes_left) {
            return Ok(Outcome::success(json!("")));
        }
        let code = self
            .script
            .generated_code
            .clone()
            .unwrap_or_else(|| format!("CODE{}", self.account_id));
        Ok(Outcome::success(json!(code)))
    }

    async fn consume_code(&self, code: &str) -> Result<Outcome, StepError> {
        self.record(CONSUME_CODE, Some(code))?;
        if self.script.failing.contains(CONSUME_CODE) || self.script.rejected_codes.contains(code)
        {
            return Ok(Outcome::failure("INVALID_CODE"));
        }
        if take_one(&self.pending_left) {
            return Ok(Outcome::pending());
        }
        Ok(Outcome::success(json!(null)))
    }
}

/// Hands out a `ScriptedApi` per account, sharing one call log.
#[derive(Default)]
pub struct ScriptedSessions {
    scripts: HashMap<String, Script>,
    default_script: Script,
    calls: CallLog,
}

impl ScriptedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, script: Script) -> Self {
        self.default_script = script;
        self
    }

    pub fn script(mut self, private_key: &str, script: Script) -> Self {
        self.scripts.insert(private_key.to_string(), script);
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn api_for(&self, account: &AccountRecord) -> ScriptedApi {
        let script = self
            .scripts
            .get(&account.private_key)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        ScriptedApi::new(account.id, script, self.calls.clone())
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessions {
    async fn open(&self, account: &AccountRecord) -> Result<Box<dyn StepApi>, StepError> {
        Ok(Box::new(self.api_for(account)))
    }
}

/// Calls recorded for one account, in order.
pub fn calls_for(log: &CallLog, account_id: i64) -> Vec<RecordedCall> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|c| c.account_id == account_id)
        .cloned()
        .collect()
}

/// Step names recorded for one account, in order.
pub fn steps_for(log: &CallLog, account_id: i64) -> Vec<&'static str> {
    calls_for(log, account_id).into_iter().map(|c| c.step).collect()
}
