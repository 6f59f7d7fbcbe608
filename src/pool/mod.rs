//! Bounded concurrent execution of account jobs.
//!
//! Every job opens its own session, runs the step state machine to
//! completion and reports an `AccountResult`. A semaphore caps how many
//! jobs are in flight; results always come back in submission order.

use std::sync::Arc;

use futures::future::join_all;
use questline_common::{AccountRecord, FieldUpdate, UpdateEvent};
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info};

use crate::api::SessionFactory;
use crate::broker::UpdateSender;
use crate::runner::{RunMode, RunnerConfig, StepRunner};
use crate::scheduler::ScheduleEvent;
use crate::scheduler::state::{AccountResult, ExecutionTimer, Role};

/// One account plus the role it plays in this batch.
#[derive(Debug, Clone)]
pub struct Job {
    pub account: AccountRecord,
    pub mode: RunMode,
}

impl Job {
    pub fn seed(account: AccountRecord) -> Self {
        Self {
            account,
            mode: RunMode::Seed,
        }
    }

    pub fn dependent(account: AccountRecord, code: impl Into<String>) -> Self {
        Self {
            account,
            mode: RunMode::Dependent { code: code.into() },
        }
    }

    fn role(&self) -> Role {
        match self.mode {
            RunMode::Seed => Role::Seed,
            RunMode::Dependent { .. } => Role::Dependent,
        }
    }
}

/// Shared state cloned into every spawned job.
#[derive(Clone)]
struct JobContext {
    sessions: Arc<dyn SessionFactory>,
    runner_config: Arc<RunnerConfig>,
    updates: UpdateSender,
    event_tx: Option<mpsc::Sender<ScheduleEvent>>,
}

impl JobContext {
    async fn emit_event(&self, event: ScheduleEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

pub struct WorkerPool {
    max_concurrent: usize,
    ctx: JobContext,
}

impl WorkerPool {
    pub fn new(
        max_concurrent: usize,
        sessions: Arc<dyn SessionFactory>,
        runner_config: Arc<RunnerConfig>,
        updates: UpdateSender,
    ) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            ctx: JobContext {
                sessions,
                runner_config,
                updates,
                event_tx: None,
            },
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ScheduleEvent>) -> Self {
        self.ctx.event_tx = Some(tx);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn mask_ids(&self) -> bool {
        self.ctx.runner_config.mask_ids
    }

    /// Spawn every job at once; at most `max_concurrent` run at a time.
    pub async fn run_all(&self, jobs: Vec<Job>) -> Vec<AccountResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mask = self.mask_ids();
        let mut identities = Vec::with_capacity(jobs.len());
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let identity = (job.account.id, job.account.display_id(mask), job.role());
            let semaphore = semaphore.clone();
            let ctx = self.ctx.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(run_job(ctx, job).await)
            });
            identities.push(identity);
            handles.push(handle);
        }

        let outcomes = join_all(handles).await;
        let mut results = Vec::with_capacity(outcomes.len());
        for ((account_id, display_id, role), outcome) in identities.into_iter().zip(outcomes) {
            let result = match outcome {
                Ok(Some(result)) => result,
                Ok(None) => {
                    error!(account = %display_id, "Worker pool closed before job ran");
                    AccountResult::aborted(account_id, display_id, role, "pool closed")
                }
                Err(e) => {
                    error!(account = %display_id, error = %e, "Job panicked");
                    let result =
                        AccountResult::aborted(account_id, display_id, role, "job panicked");
                    self.ctx
                        .emit_event(ScheduleEvent::AccountFinished {
                            result: result.clone(),
                        })
                        .await;
                    result
                }
            };
            results.push(result);
        }
        results
    }

    /// Submit jobs in windows of `max_concurrent`, awaiting each window
    /// fully before the next is submitted.
    pub async fn run_windowed(&self, jobs: Vec<Job>) -> Vec<AccountResult> {
        let mut results = Vec::with_capacity(jobs.len());
        let mut remaining = jobs.into_iter();
        let mut window_index = 0usize;

        loop {
            let window: Vec<Job> = remaining.by_ref().take(self.max_concurrent).collect();
            if window.is_empty() {
                break;
            }
            window_index += 1;
            info!(window = window_index, jobs = window.len(), "Submitting window");
            results.extend(self.run_all(window).await);
        }
        results
    }
}

async fn run_job(ctx: JobContext, job: Job) -> AccountResult {
    let timer = ExecutionTimer::start();
    let mask = ctx.runner_config.mask_ids;
    let display_id = job.account.display_id(mask);
    let role = job.role();

    ctx.emit_event(ScheduleEvent::AccountStarted {
        display_id: display_id.clone(),
        role,
    })
    .await;

    let code = match ctx.sessions.open(&job.account).await {
        Ok(api) => {
            let runner = StepRunner::new(api, ctx.updates.clone(), ctx.runner_config.clone());
            runner.run(&job.account, &job.mode).await
        }
        Err(e) => {
            error!(account = %display_id, error = %e, "Failed to open session");
            ctx.updates
                .enqueue(UpdateEvent::single(
                    job.account.private_key.clone(),
                    FieldUpdate::AppendError(format!("session: {e}")),
                ))
                .await;
            None
        }
    };

    let result = AccountResult::finished(
        job.account.id,
        display_id,
        role,
        job.account.is_complete(),
        code,
        timer.elapsed(),
    );
    ctx.emit_event(ScheduleEvent::AccountFinished {
        result: result.clone(),
    })
    .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StepApi;
    use crate::api::testing::*;
    use crate::broker::UpdateBroker;
    use crate::errors::StepError;
    use crate::store::{AccountDb, DbHandle};
    use questline_common::{NewAccount, Outcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(n: u8) -> String {
        format!("0x{}", format!("{n:02x}").repeat(32))
    }

    fn seeded_db(count: u8) -> DbHandle {
        let db = AccountDb::new_in_memory().unwrap();
        for n in 1..=count {
            let account = NewAccount::new(&key(n), "h:1", "e@x", "h", "t").unwrap();
            db.upsert_if_absent(&account).unwrap();
        }
        DbHandle::new(db)
    }

    fn accounts(db: &DbHandle) -> Vec<AccountRecord> {
        db.lock_sync().unwrap().load_all().unwrap()
    }

    fn pool(sessions: ScriptedSessions, broker: &UpdateBroker, max: usize) -> WorkerPool {
        WorkerPool::new(
            max,
            Arc::new(sessions),
            Arc::new(RunnerConfig::immediate()),
            broker.sender(),
        )
    }

    #[tokio::test]
    async fn test_run_all_returns_results_in_submission_order() {
        let db = seeded_db(5);
        let broker = UpdateBroker::spawn(db.clone(), 64);
        let pool = pool(ScriptedSessions::new(), &broker, 2);

        let jobs: Vec<Job> = accounts(&db).into_iter().map(Job::seed).collect();
        let ids: Vec<i64> = jobs.iter().map(|j| j.account.id).collect();
        let results = pool.run_all(jobs).await;

        assert_eq!(results.iter().map(|r| r.account_id).collect::<Vec<_>>(), ids);
        for result in &results {
            assert!(result.success);
            assert_eq!(result.code, Some(format!("CODE{}", result.account_id)));
        }
        broker.close().await;
    }

    #[tokio::test]
    async fn test_panicking_job_becomes_failure() {
        let db = seeded_db(3);
        let broker = UpdateBroker::spawn(db.clone(), 64);
        let sessions = ScriptedSessions::new().script(
            &key(2),
            Script {
                panic_on: Some(REGISTER),
                ..Default::default()
            },
        );
        let pool = pool(sessions, &broker, 3);

        let jobs: Vec<Job> = accounts(&db).into_iter().map(Job::seed).collect();
        let results = pool.run_all(jobs).await;

        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].code, None);
        assert!(results[2].success);
        broker.close().await;
    }

    #[tokio::test]
    async fn test_run_windowed_processes_every_job() {
        let db = seeded_db(7);
        let broker = UpdateBroker::spawn(db.clone(), 64);
        let sessions = ScriptedSessions::new();
        let calls = sessions.calls();
        let pool = pool(sessions, &broker, 3);

        let jobs: Vec<Job> = accounts(&db)
            .into_iter()
            .map(|a| Job::dependent(a, "SHARED"))
            .collect();
        let results = pool.run_windowed(jobs).await;

        assert_eq!(results.len(), 7);
        assert!(results.iter().all(|r| r.code.as_deref() == Some("SHARED")));
        let consumes = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.step == CONSUME_CODE)
            .count();
        assert_eq!(consumes, 7);

        broker.close().await;
        let stored = accounts(&db);
        assert!(stored.iter().all(|a| a.code_consumed && a.code_value == "SHARED"));
    }

    /// Session factory that tracks how many sessions are open at once.
    struct CountingSessions {
        inner: ScriptedSessions,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct CountingApi {
        inner: ScriptedApi,
        current: Arc<AtomicUsize>,
    }

    impl Drop for CountingApi {
        fn drop(&mut self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl StepApi for CountingApi {
        async fn sign_in(&self) -> Result<Outcome, StepError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.sign_in().await
        }
        async fn register(&self, email: &str) -> Result<Outcome, StepError> {
            self.inner.register(email).await
        }
        async fn follow(&self) -> Result<Outcome, StepError> {
            self.inner.follow().await
        }
        async fn link_handle(&self, handle: &str) -> Result<Outcome, StepError> {
            self.inner.link_handle(handle).await
        }
        async fn link_oauth(&self, token: &str) -> Result<Outcome, StepError> {
            self.inner.link_oauth(token).await
        }
        async fn generate_code(&self) -> Result<Outcome, StepError> {
            self.inner.generate_code().await
        }
        async fn consume_code(&self, code: &str) -> Result<Outcome, StepError> {
            self.inner.consume_code(code).await
        }
    }

    #[async_trait::async_trait]
    impl SessionFactory for CountingSessions {
        async fn open(
            &self,
            account: &AccountRecord,
        ) -> Result<Box<dyn StepApi>, StepError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(CountingApi {
                inner: self.inner.api_for(account),
                current: self.current.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let db = seeded_db(8);
        let broker = UpdateBroker::spawn(db.clone(), 64);
        let peak = Arc::new(AtomicUsize::new(0));
        let sessions = CountingSessions {
            inner: ScriptedSessions::new(),
            current: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let pool = WorkerPool::new(
            3,
            Arc::new(sessions),
            Arc::new(RunnerConfig::immediate()),
            broker.sender(),
        );

        let jobs: Vec<Job> = accounts(&db).into_iter().map(Job::seed).collect();
        let results = pool.run_all(jobs).await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        broker.close().await;
    }

    #[tokio::test]
    async fn test_events_are_emitted_per_account() {
        let db = seeded_db(2);
        let broker = UpdateBroker::spawn(db.clone(), 64);
        let (tx, mut rx) = mpsc::channel(32);
        let pool = pool(ScriptedSessions::new(), &broker, 2).with_event_channel(tx);

        let jobs: Vec<Job> = accounts(&db).into_iter().map(Job::seed).collect();
        pool.run_all(jobs).await;
        drop(pool);

        let mut started = 0;
        let mut finished = 0;
        while let Some(event) = rx.recv().await {
            match event {
                ScheduleEvent::AccountStarted { .. } => started += 1,
                ScheduleEvent::AccountFinished { .. } => finished += 1,
                _ => {}
            }
        }
        assert_eq!((started, finished), (2, 2));
        broker.close().await;
    }
}
