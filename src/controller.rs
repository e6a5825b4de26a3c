//! Single-active-run coordinator and operator control surface.
//!
//! A run walks three phases: discovery (paged, retried), scoring against a
//! frozen copy of the preferences, and a throttled apply loop gated by the
//! [`ActionScheduler`]. Progress is published as whole [`RunStatus`]
//! snapshots through a `watch` channel. Manual submissions share the apply
//! lock and the scheduler with the run loop, so at most one application is
//! ever in flight.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actuator::{
    Actuator, ActuatorError, ApplicantProfile, ApplicationOutcome, SearchCriteria,
};
use crate::config::Config;
use crate::error::{ControlError, ErrorClass, HireloopError, Result, StorageError};
use crate::matcher::{MatchVerdict, PreferenceMatcher, ScoredCandidate};
use crate::scheduler::{ActionOutcome, ActionScheduler, Authorization, BudgetLimits, Permit};
use crate::state_machine::{
    ApplicationRecord, ApplicationStateMachine, AttemptOutcome, CandidateOutcome, CandidateState,
    JobCandidate, LogEntry, LogLevel, Posting, Transition,
};
use crate::store::{DataKind, PersistentStore, StorageInfo, StoreStats};

const MODULE: &str = "controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Discovering,
    Scoring,
    Applying,
    Stopping,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Discovering => write!(f, "discovering"),
            RunPhase::Scoring => write!(f, "scoring"),
            RunPhase::Applying => write!(f, "applying"),
            RunPhase::Stopping => write!(f, "stopping"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub found: usize,
    pub queued: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Snapshot published to the console. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub running: bool,
    pub phase: RunPhase,
    pub run_id: Option<Uuid>,
    pub counts: RunCounts,
    pub applied_today: u32,
    pub applied_this_session: u32,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunStatus {
    fn idle(applied_today: u32) -> Self {
        Self {
            running: false,
            phase: RunPhase::Idle,
            run_id: None,
            counts: RunCounts::default(),
            applied_today,
            applied_this_session: 0,
            last_error: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub accepted: bool,
    pub message: String,
    pub run_id: Option<Uuid>,
}

impl ControlResponse {
    fn accepted(message: impl Into<String>, run_id: Option<Uuid>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
            run_id,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            run_id: None,
        }
    }
}

/// Summary returned once a run task finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub counts: RunCounts,
    pub stopped: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct Shared {
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    store: Arc<PersistentStore>,
    actuator: Arc<dyn Actuator>,
    scheduler: ActionScheduler,
    active: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    apply_lock: tokio::sync::Mutex<()>,
    status: watch::Sender<RunStatus>,
    task: Mutex<Option<JoinHandle<RunReport>>>,
}

impl Shared {
    fn config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Applies `f` to the current status and republishes it with fresh
    /// budget counters and timestamp.
    fn publish(&self, f: impl FnOnce(&mut RunStatus)) {
        let budget = self.scheduler.snapshot();
        self.status.send_modify(|status| {
            f(status);
            status.applied_today = budget.applied_today;
            status.applied_this_session = budget.applied_this_session;
            status.timestamp = Utc::now();
        });
    }

    /// Best-effort audit entry outside the transition trail.
    fn audit(&self, entry: LogEntry) {
        if let Err(err) = self.store.append_log(entry) {
            warn!(error = %err, "failed to persist log entry");
        }
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns `false`
    /// when the sleep was cut short by a stop request.
    async fn pause(&self, duration: Duration) -> bool {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.stop_requested() {
            return false;
        }
        tokio::select! {
            _ = sleep(duration) => !self.stop_requested(),
            _ = notified => false,
        }
    }

    async fn call_apply(
        &self,
        candidate: &JobCandidate,
        profile: &ApplicantProfile,
        timeout_ms: u64,
    ) -> (std::result::Result<ApplicationOutcome, ActuatorError>, u64) {
        let started = Instant::now();
        let result = timeout(
            Duration::from_millis(timeout_ms),
            self.actuator.apply(candidate, profile),
        )
        .await
        .unwrap_or(Err(ActuatorError::Timeout(timeout_ms)));
        (result, started.elapsed().as_millis() as u64)
    }
}

/// Releases the single-run flag however the run task ends. The stop flag is
/// cleared first so a stop accepted for this run cannot leak into the next.
struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.stop_requested.store(false, Ordering::SeqCst);
        self.0.active.store(false, Ordering::SeqCst);
    }
}

/// Coordinates runs and serves the operator's control operations.
#[derive(Clone)]
pub struct RunController {
    shared: Arc<Shared>,
}

impl RunController {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        store: Arc<PersistentStore>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        let offset = config.utc_offset();
        let today = Utc::now().with_timezone(&offset).date_naive();
        let applied_today = store.applied_on(today, offset);
        let scheduler = ActionScheduler::new(
            config.scheduler.clone(),
            BudgetLimits::from(&config.application),
            offset,
            today,
            applied_today,
        );
        let (status, _) = watch::channel(RunStatus::idle(applied_today));

        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                config_path,
                store,
                actuator,
                scheduler,
                active: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                apply_lock: tokio::sync::Mutex::new(()),
                status,
                task: Mutex::new(None),
            }),
        }
    }

    /// Opens the store under the config's data directory.
    pub fn open(
        config: Config,
        config_path: Option<PathBuf>,
        actuator: Arc<dyn Actuator>,
    ) -> Result<Self> {
        let store = Arc::new(PersistentStore::open(&config.application.data_dir)?);
        Ok(Self::new(config, config_path, store, actuator))
    }

    // ─── Run control ────────────────────────────────────────────────────────

    /// Starts a run in the background. Exactly one concurrent caller wins.
    pub fn start(&self) -> ControlResponse {
        let shared = &self.shared;
        if shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return ControlResponse::rejected(ControlError::RunActive.to_string());
        }
        let guard = ActiveGuard(shared.clone());

        let config = shared.config();
        if let Err(err) = config.validate() {
            warn!(error = %err, "run rejected");
            shared.audit(LogEntry::new(
                LogLevel::Error,
                MODULE,
                format!("run rejected: {err}"),
            ));
            shared.publish(|s| s.last_error = Some(err.to_string()));
            return ControlResponse::rejected(err.to_string());
        }

        let run_id = Uuid::new_v4();
        shared.scheduler.begin_session(
            config.scheduler.clone(),
            BudgetLimits::from(&config.application),
        );
        shared.publish(|s| {
            *s = RunStatus::idle(0);
            s.running = true;
            s.phase = RunPhase::Discovering;
            s.run_id = Some(run_id);
        });

        let run = Run {
            machine: ApplicationStateMachine::new(
                run_id,
                config.application.max_retries_per_run,
                shared.store.clone(),
            ),
            profile: config.applicant_profile(),
            shared: shared.clone(),
            config,
            run_id,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run.execute().await
        });
        *shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(%run_id, "run accepted");
        ControlResponse::accepted("run started", Some(run_id))
    }

    /// Requests a cooperative stop. The in-flight application, if any,
    /// completes and is recorded.
    pub fn stop(&self) -> ControlResponse {
        let shared = &self.shared;
        if !shared.active.load(Ordering::SeqCst) {
            return ControlResponse::rejected("no active run");
        }
        shared.stop_requested.store(true, Ordering::SeqCst);
        shared.wake.notify_waiters();
        shared.publish(|s| {
            if s.running {
                s.phase = RunPhase::Stopping;
            }
        });
        let run_id = shared.status.borrow().run_id;
        info!(run_id = ?run_id, "stop requested");
        ControlResponse::accepted("stop requested", run_id)
    }

    pub fn status(&self) -> RunStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Waits for the most recently started run to finish.
    pub async fn wait(&self) -> Option<RunReport> {
        let handle = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "run task did not complete");
                None
            }
        }
    }

    // ─── Configuration ──────────────────────────────────────────────────────

    /// Current configuration with secrets redacted.
    pub fn config(&self) -> Config {
        self.shared.config().redacted()
    }

    /// Replaces the configuration. An active run keeps its own frozen copy.
    pub fn update_config(&self, config: Config) -> Result<()> {
        if let Some(path) = &self.shared.config_path {
            config.save(path)?;
        }
        *self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        self.shared
            .audit(LogEntry::new(LogLevel::Info, MODULE, "configuration updated"));
        Ok(())
    }

    // ─── Data ───────────────────────────────────────────────────────────────

    pub fn list_candidates(&self) -> Vec<JobCandidate> {
        self.shared.store.candidates()
    }

    pub fn list_applications(&self) -> Vec<ApplicationRecord> {
        self.shared.store.applications()
    }

    pub fn list_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.shared.store.logs(Some(limit))
    }

    pub fn stats(&self, now: DateTime<Utc>) -> StoreStats {
        let offset = self.shared.config().utc_offset();
        self.shared.store.stats(now, offset)
    }

    pub fn storage_info(&self) -> StorageInfo {
        self.shared.store.info()
    }

    /// Snapshots every repository and the current configuration.
    pub fn backup(&self) -> Result<PathBuf> {
        let config = self.shared.config();
        let path = self.shared.store.backup(Some(&config), Utc::now())?;
        self.shared.audit(LogEntry::new(
            LogLevel::Info,
            MODULE,
            format!("backup written to {}", path.display()),
        ));
        Ok(path)
    }

    /// Purges a repository. Refused while a run is active.
    pub fn clear_data(&self, kind: DataKind) -> Result<()> {
        if self.is_running() {
            return Err(ControlError::RunActive.into());
        }
        self.shared.store.clear(kind)?;
        self.shared.audit(LogEntry::new(
            LogLevel::Warn,
            MODULE,
            format!("cleared {kind}"),
        ));
        Ok(())
    }

    // ─── Manual submission ──────────────────────────────────────────────────

    /// Applies to one stored candidate right away, outside of any run.
    /// Budgets and cooldowns still apply; the jitter delay does not.
    pub async fn submit_manual(&self, candidate_id: &str) -> Result<ApplicationRecord> {
        let shared = &self.shared;
        let _lock = shared.apply_lock.lock().await;

        let candidate = shared
            .store
            .candidate(candidate_id)
            .ok_or_else(|| StorageError::CandidateNotFound(candidate_id.to_string()))?;
        if candidate.is_applied() {
            return Err(ControlError::AlreadyApplied(candidate_id.to_string()).into());
        }

        let permit = match shared.scheduler.authorize() {
            Authorization::Granted { permit, .. } => permit,
            Authorization::Denied { reason, wait } => {
                return Err(ControlError::NotAuthorized {
                    reason: reason.to_string(),
                    wait_ms: wait.as_millis() as u64,
                }
                .into());
            }
        };

        let config = shared.config();
        let submission_id = Uuid::new_v4();
        let mut machine = ApplicationStateMachine::new(submission_id, 0, shared.store.clone());
        let entered = machine.admit_manual(candidate_id).and_then(|()| {
            machine
                .transition(candidate_id, CandidateState::Applying, "manual submission")
                .map(|_| ())
        });
        if let Err(err) = entered {
            shared.scheduler.record_outcome(permit, ActionOutcome::Abandoned);
            return Err(err);
        }

        let (result, latency_ms) = shared
            .call_apply(
                &candidate,
                &config.applicant_profile(),
                config.application.apply_timeout_ms,
            )
            .await;
        let action = scheduler_outcome(&result);
        let settled = settle_manual(shared, &mut machine, &candidate, latency_ms, result);
        shared.scheduler.record_outcome(permit, action);
        shared.publish(|_| {});
        settled
    }
}

fn settle_manual(
    shared: &Shared,
    machine: &mut ApplicationStateMachine,
    candidate: &JobCandidate,
    latency_ms: u64,
    result: std::result::Result<ApplicationOutcome, ActuatorError>,
) -> Result<ApplicationRecord> {
    let id = candidate.id.as_str();
    let outcome_id = machine.run_id();
    let record = attempt_record(id, None, 1, latency_ms, &result);
    shared.store.append_application(record.clone())?;

    match result {
        Ok(ApplicationOutcome::Submitted { .. }) => {
            machine.transition(id, CandidateState::Applied, "submitted")?;
            shared
                .store
                .set_outcome(id, outcome_id, CandidateOutcome::Applied, None)?;
            info!(candidate_id = id, "manual application submitted");
        }
        Ok(ApplicationOutcome::Skipped { reason }) => {
            machine.transition(id, CandidateState::Skipped, &reason)?;
            shared
                .store
                .set_outcome(id, outcome_id, CandidateOutcome::Skipped, Some(reason))?;
        }
        Err(err) => {
            warn!(candidate_id = id, error = %err, "manual application failed");
            let reason = err.to_string();
            if err.class() == ErrorClass::RateLimited {
                machine.transition(id, CandidateState::RateLimited, &reason)?;
                machine.retry_or_fail(id, &reason)?;
            } else {
                machine.transition(id, CandidateState::Failed, &reason)?;
            }
            shared
                .store
                .set_outcome(id, outcome_id, CandidateOutcome::Failed, None)?;
            shared.publish(|s| s.last_error = Some(reason));
        }
    }
    Ok(record)
}

fn attempt_record(
    candidate_id: &str,
    run_id: Option<Uuid>,
    attempt: u32,
    latency_ms: u64,
    result: &std::result::Result<ApplicationOutcome, ActuatorError>,
) -> ApplicationRecord {
    match result {
        Ok(ApplicationOutcome::Submitted { confirmation }) => {
            let record = ApplicationRecord::new(
                candidate_id,
                run_id,
                attempt,
                AttemptOutcome::Succeeded,
                latency_ms,
            );
            match confirmation {
                Some(confirmation) => record.with_message(confirmation.clone()),
                None => record,
            }
        }
        Ok(ApplicationOutcome::Skipped { reason }) => ApplicationRecord::new(
            candidate_id,
            run_id,
            attempt,
            AttemptOutcome::Skipped,
            latency_ms,
        )
        .with_message(reason.clone()),
        Err(err) => ApplicationRecord::new(
            candidate_id,
            run_id,
            attempt,
            AttemptOutcome::Failed,
            latency_ms,
        )
        .with_error(err.class(), err.to_string()),
    }
}

fn scheduler_outcome(
    result: &std::result::Result<ApplicationOutcome, ActuatorError>,
) -> ActionOutcome {
    match result {
        Ok(ApplicationOutcome::Submitted { .. }) => ActionOutcome::Succeeded,
        Ok(ApplicationOutcome::Skipped { .. }) => ActionOutcome::Skipped,
        Err(err) => match err.class() {
            ErrorClass::Fatal | ErrorClass::Permanent => ActionOutcome::Failed,
            ErrorClass::Transient => ActionOutcome::TransientFailure,
            ErrorClass::RateLimited => ActionOutcome::RateLimited {
                retry_after: err.retry_after(),
            },
        },
    }
}

/// What the apply loop does with a candidate after an attempt.
enum Settled {
    Done,
    Requeue,
    Abort(ActuatorError),
}

/// One run: owns the frozen config and the per-run state machine.
struct Run {
    shared: Arc<Shared>,
    config: Config,
    run_id: Uuid,
    machine: ApplicationStateMachine,
    profile: ApplicantProfile,
}

impl Run {
    async fn execute(mut self) -> RunReport {
        let started_at = Utc::now();
        let run_id = self.run_id;
        info!(%run_id, "run started");
        self.shared
            .audit(LogEntry::new(LogLevel::Info, MODULE, "run started").for_run(run_id));

        let error = match self.phases().await {
            Ok(()) => None,
            Err(err) => {
                error!(%run_id, error = %err, "run aborted");
                self.shared.audit(
                    LogEntry::new(LogLevel::Error, MODULE, format!("run aborted: {err}"))
                        .for_run(run_id),
                );
                Some(err.to_string())
            }
        };
        let stopped = self.shared.stop_requested();

        self.shared.publish(|s| {
            s.running = false;
            s.phase = if error.is_some() {
                RunPhase::Failed
            } else {
                RunPhase::Idle
            };
            if error.is_some() {
                s.last_error = error.clone();
            }
        });
        let counts = self.shared.status.borrow().counts;
        let summary = format!(
            "run finished: {} found, {} applied, {} skipped, {} failed",
            counts.found, counts.applied, counts.skipped, counts.failed
        );
        info!(%run_id, stopped, "{summary}");
        self.shared
            .audit(LogEntry::new(LogLevel::Info, MODULE, summary).for_run(run_id));

        RunReport {
            run_id,
            counts,
            stopped,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn phases(&mut self) -> Result<()> {
        let postings = self.discover().await?;
        if self.shared.stop_requested() {
            return Ok(());
        }
        let fresh = self.deduplicate(postings)?;
        let ranked = self.score(fresh)?;
        if self.shared.stop_requested() {
            return Ok(());
        }
        self.apply_all(ranked).await
    }

    // ─── Discovery ──────────────────────────────────────────────────────────

    async fn discover(&self) -> Result<Vec<Posting>> {
        self.shared.publish(|s| s.phase = RunPhase::Discovering);
        let discovery = &self.config.discovery;
        let mut postings = Vec::new();
        let mut pages_ok = 0;
        let mut last_error = None;

        for page in 1..=discovery.pages {
            if self.shared.stop_requested() {
                break;
            }
            match self.discover_page(page).await {
                Ok(None) => break,
                Ok(Some(batch)) => {
                    pages_ok += 1;
                    let done = batch.is_empty();
                    postings.extend(batch);
                    self.shared.publish(|s| s.counts.found = postings.len());
                    if done {
                        break;
                    }
                }
                Err(err) if err.class() == ErrorClass::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(run_id = %self.run_id, page, error = %err, "discovery gave up on page");
                    last_error = Some(err);
                    break;
                }
            }
        }

        match last_error {
            Some(err) if pages_ok == 0 => Err(err.into()),
            _ => Ok(postings),
        }
    }

    /// Fetches one page with retries. `Ok(None)` means a stop cut the retry
    /// wait short.
    async fn discover_page(
        &self,
        page: u32,
    ) -> std::result::Result<Option<Vec<Posting>>, ActuatorError> {
        let discovery = &self.config.discovery;
        let criteria =
            SearchCriteria::from_preferences(&self.config.preferences, page, discovery.page_size);
        let timeout_ms = self.config.application.apply_timeout_ms;
        let mut attempt = 0;

        loop {
            let result = timeout(
                Duration::from_millis(timeout_ms),
                self.shared.actuator.discover(&criteria),
            )
            .await
            .unwrap_or(Err(ActuatorError::Timeout(timeout_ms)));

            let err = match result {
                Ok(postings) => return Ok(Some(postings)),
                Err(err) => err,
            };
            let retryable = err.is_retryable_discovery()
                || matches!(err, ActuatorError::RateLimited { .. });
            self.shared.audit(
                LogEntry::new(
                    LogLevel::Warn,
                    MODULE,
                    format!("discovery page {page} attempt {} failed: {err}", attempt + 1),
                )
                .for_run(self.run_id),
            );
            self.shared.publish(|s| {
                s.counts.errors += 1;
                s.last_error = Some(err.to_string());
            });
            if !retryable || attempt >= discovery.max_retries {
                return Err(err);
            }

            attempt += 1;
            let backoff = Duration::from_millis(discovery.delay_for_attempt(attempt));
            let wait = if err.class() == ErrorClass::RateLimited {
                let scheduler = &self.shared.scheduler;
                scheduler.record_rate_limit(err.retry_after());
                let cooldown = Duration::from_millis(scheduler.snapshot().cooldown_remaining_ms);
                cooldown.max(backoff)
            } else {
                backoff
            };
            debug!(page, attempt, wait_ms = wait.as_millis() as u64, "retrying discovery");
            if !self.shared.pause(wait).await {
                info!(run_id = %self.run_id, page, "discovery stopped during retry wait");
                return Ok(None);
            }
        }
    }

    /// Drops duplicates within the run and candidates already applied to,
    /// then persists whatever is new.
    fn deduplicate(&self, postings: Vec<Posting>) -> Result<Vec<JobCandidate>> {
        let now = Utc::now();
        let applied = self.shared.store.applied_ids();
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        let mut already_applied = 0;

        for candidate in postings
            .into_iter()
            .map(|p| JobCandidate::from_posting(p, now))
        {
            if !seen.insert(candidate.id.clone()) {
                continue;
            }
            if applied.contains(&candidate.id) {
                already_applied += 1;
                continue;
            }
            fresh.push(candidate);
        }

        let inserted = self.shared.store.upsert_candidates(&fresh)?;
        let found = seen.len();
        info!(run_id = %self.run_id, found, new = inserted, already_applied, "postings deduplicated");
        self.shared.publish(|s| s.counts.found = found);
        Ok(fresh)
    }

    // ─── Scoring ────────────────────────────────────────────────────────────

    fn score(&mut self, candidates: Vec<JobCandidate>) -> Result<Vec<ScoredCandidate>> {
        self.shared.publish(|s| s.phase = RunPhase::Scoring);
        let store = self.shared.store.clone();
        let mut queue = Vec::new();
        let mut skipped = 0;

        for candidate in candidates {
            let id = candidate.id.clone();
            self.machine.discover(&id)?;
            let verdict = PreferenceMatcher::evaluate(&candidate, &self.config.preferences);
            let score = verdict.score();
            store.set_score(&id, self.run_id, score)?;
            self.machine
                .transition(&id, CandidateState::Scored, &format!("score {score:.3}"))?;

            match verdict {
                MatchVerdict::Excluded { reason, .. } => {
                    self.machine.transition(&id, CandidateState::Skipped, &reason)?;
                    store.set_outcome(&id, self.run_id, CandidateOutcome::Skipped, Some(reason))?;
                    skipped += 1;
                }
                MatchVerdict::Eligible { .. } => {
                    self.machine.transition(&id, CandidateState::Queued, "eligible")?;
                    queue.push(ScoredCandidate { candidate, score });
                }
            }
        }

        PreferenceMatcher::rank(&mut queue);
        info!(run_id = %self.run_id, queued = queue.len(), skipped, "candidates scored");
        let queued = queue.len();
        self.shared.publish(|s| {
            s.counts.queued = queued;
            s.counts.skipped += skipped;
        });
        Ok(queue)
    }

    // ─── Applying ───────────────────────────────────────────────────────────

    async fn apply_all(&mut self, ranked: Vec<ScoredCandidate>) -> Result<()> {
        self.shared.publish(|s| s.phase = RunPhase::Applying);
        let mut queue: VecDeque<ScoredCandidate> = ranked.into();

        while let Some(next) = queue.pop_front() {
            if self.shared.stop_requested() {
                break;
            }

            let (delay, permit) = match self.shared.scheduler.authorize() {
                Authorization::Granted { delay, permit } => (delay, permit),
                Authorization::Denied { reason, .. } if reason.is_budget() => {
                    let pending = queue.len() + 1;
                    info!(run_id = %self.run_id, %reason, pending, "budget reached");
                    self.shared.audit(
                        LogEntry::new(
                            LogLevel::Info,
                            MODULE,
                            format!("{reason}; {pending} candidates left pending"),
                        )
                        .for_run(self.run_id),
                    );
                    break;
                }
                Authorization::Denied { reason, wait } => {
                    debug!(%reason, wait_ms = wait.as_millis() as u64, "waiting for cooldown");
                    queue.push_front(next);
                    if !self.shared.pause(wait).await {
                        break;
                    }
                    continue;
                }
            };

            debug!(
                candidate_id = %next.candidate.id,
                delay_ms = delay.as_millis() as u64,
                "pacing before apply"
            );
            if !self.shared.pause(delay).await {
                self.shared
                    .scheduler
                    .record_outcome(permit, ActionOutcome::Abandoned);
                break;
            }

            match self.attempt(&next.candidate, permit).await? {
                Settled::Done => {}
                Settled::Requeue => queue.push_front(next),
                Settled::Abort(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn attempt(&mut self, candidate: &JobCandidate, permit: Permit) -> Result<Settled> {
        let shared = self.shared.clone();
        let id = candidate.id.as_str();
        let _lock = shared.apply_lock.lock().await;

        if shared.store.candidate(id).is_some_and(|c| c.is_applied()) {
            info!(candidate_id = id, "already applied outside this run");
            shared.scheduler.record_outcome(permit, ActionOutcome::Abandoned);
            return Ok(Settled::Done);
        }

        let attempt = self.machine.retries(id) + 1;
        if let Err(err) =
            self.machine
                .transition(id, CandidateState::Applying, &format!("attempt {attempt}"))
        {
            shared.scheduler.record_outcome(permit, ActionOutcome::Abandoned);
            return Err(err);
        }

        let (result, latency_ms) = shared
            .call_apply(candidate, &self.profile, self.config.application.apply_timeout_ms)
            .await;
        let action = scheduler_outcome(&result);
        let settled = self.settle(candidate, attempt, latency_ms, result);
        shared.scheduler.record_outcome(permit, action);
        shared.publish(|_| {});
        settled
    }

    fn settle(
        &mut self,
        candidate: &JobCandidate,
        attempt: u32,
        latency_ms: u64,
        result: std::result::Result<ApplicationOutcome, ActuatorError>,
    ) -> Result<Settled> {
        let id = candidate.id.as_str();
        let store = self.shared.store.clone();
        store.append_application(attempt_record(
            id,
            Some(self.run_id),
            attempt,
            latency_ms,
            &result,
        ))?;

        let err = match result {
            Ok(ApplicationOutcome::Submitted { .. }) => {
                self.machine.transition(id, CandidateState::Applied, "submitted")?;
                store.set_outcome(id, self.run_id, CandidateOutcome::Applied, None)?;
                info!(
                    run_id = %self.run_id,
                    candidate_id = id,
                    title = %candidate.title,
                    organization = %candidate.organization,
                    latency_ms,
                    "application submitted"
                );
                self.shared.publish(|s| s.counts.applied += 1);
                return Ok(Settled::Done);
            }
            Ok(ApplicationOutcome::Skipped { reason }) => {
                self.machine.transition(id, CandidateState::Skipped, &reason)?;
                store.set_outcome(id, self.run_id, CandidateOutcome::Skipped, Some(reason))?;
                self.shared.publish(|s| s.counts.skipped += 1);
                return Ok(Settled::Done);
            }
            Err(err) => err,
        };

        let reason = err.to_string();
        warn!(run_id = %self.run_id, candidate_id = id, class = %err.class(), error = %err, "application attempt failed");
        self.shared.publish(|s| {
            s.counts.errors += 1;
            s.last_error = Some(reason.clone());
        });

        match err.class() {
            ErrorClass::Fatal => {
                self.fail(id, &reason)?;
                Ok(Settled::Abort(err))
            }
            ErrorClass::Permanent => {
                self.fail(id, &reason)?;
                Ok(Settled::Done)
            }
            ErrorClass::RateLimited => {
                self.machine
                    .transition(id, CandidateState::RateLimited, &reason)?;
                self.retry_or_fail(id, &reason)
            }
            ErrorClass::Transient => self.retry_or_fail(id, &reason),
        }
    }

    fn fail(&mut self, id: &str, reason: &str) -> Result<()> {
        self.machine.transition(id, CandidateState::Failed, reason)?;
        self.shared
            .store
            .set_outcome(id, self.run_id, CandidateOutcome::Failed, None)?;
        self.shared.publish(|s| s.counts.failed += 1);
        Ok(())
    }

    fn retry_or_fail(&mut self, id: &str, reason: &str) -> Result<Settled> {
        match self.machine.retry_or_fail(id, reason)? {
            Transition::Retry { attempt } => {
                debug!(candidate_id = id, attempt, "candidate requeued");
                Ok(Settled::Requeue)
            }
            Transition::Exhausted => {
                self.shared
                    .store
                    .set_outcome(id, self.run_id, CandidateOutcome::Failed, None)?;
                self.shared.publish(|s| s.counts.failed += 1);
                Ok(Settled::Done)
            }
        }
    }
}
