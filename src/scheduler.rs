//! Pacing and budget enforcement for outward actions.
//!
//! [`ActionScheduler`] is the only place that answers "may we act now".
//! Every grant carries a [`Permit`] that reserves one budget slot until it
//! is resolved through [`ActionScheduler::record_outcome`], so two grants in
//! flight can never push a counter past its limit.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ApplicationSettings, SchedulerSettings};

/// Per-day and per-session ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub per_day: u32,
    pub per_session: u32,
}

impl From<&ApplicationSettings> for BudgetLimits {
    fn from(settings: &ApplicationSettings) -> Self {
        Self {
            per_day: settings.max_applications_per_day,
            per_session: settings.max_applications_per_session,
        }
    }
}

/// Reservation for one granted action. Resolve it exactly once.
#[must_use = "a permit must be resolved with record_outcome"]
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    DailyBudgetExhausted,
    SessionBudgetExhausted,
    Cooldown,
}

impl DenyReason {
    /// Budget denials end the apply phase; cooldowns only pause it.
    pub fn is_budget(self) -> bool {
        !matches!(self, DenyReason::Cooldown)
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::DailyBudgetExhausted => write!(f, "daily budget exhausted"),
            DenyReason::SessionBudgetExhausted => write!(f, "session budget exhausted"),
            DenyReason::Cooldown => write!(f, "cooling down"),
        }
    }
}

#[derive(Debug)]
pub enum Authorization {
    Granted { delay: Duration, permit: Permit },
    Denied { reason: DenyReason, wait: Duration },
}

/// How a permitted action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Skipped,
    Failed,
    TransientFailure,
    RateLimited { retry_after: Option<Duration> },
    /// The action never happened (stop requested during the delay).
    Abandoned,
}

/// Point-in-time view of counters and cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub applied_today: u32,
    pub applied_this_session: u32,
    pub reserved: u32,
    pub max_per_day: u32,
    pub max_per_session: u32,
    pub escalation_level: u32,
    pub cooldown_ms: u64,
    pub cooldown_remaining_ms: u64,
}

struct Inner {
    settings: SchedulerSettings,
    limits: BudgetLimits,
    day: NaiveDate,
    applied_today: u32,
    applied_session: u32,
    outstanding: HashSet<u64>,
    next_permit: u64,
    level: u32,
    cooldown_ms: u64,
    blocked_until: Option<Instant>,
    transient_streak: u32,
}

impl Inner {
    fn reserved(&self) -> u32 {
        self.outstanding.len() as u32
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(from = %self.day, to = %today, "daily budget rolled over");
            self.day = today;
            self.applied_today = 0;
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.blocked_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }

    fn block_for(&mut self, now: Instant, window: Duration) {
        let until = now + window;
        if self.blocked_until.is_none_or(|current| current < until) {
            self.blocked_until = Some(until);
        }
    }

    fn escalate(&mut self, now: Instant, retry_after: Option<Duration>) {
        let s = &self.settings;
        self.cooldown_ms = if self.cooldown_ms == 0 {
            s.initial_cooldown_ms
        } else {
            ((self.cooldown_ms as f64 * s.cooldown_multiplier) as u64).min(s.max_cooldown_ms)
        };
        self.level += 1;
        let window = Duration::from_millis(self.cooldown_ms).max(retry_after.unwrap_or_default());
        self.block_for(now, window);
        warn!(
            level = self.level,
            cooldown_ms = window.as_millis() as u64,
            "rate limited, cooling down"
        );
    }

    fn decay(&mut self) {
        if self.level == 0 {
            return;
        }
        let s = &self.settings;
        self.level -= 1;
        self.cooldown_ms = (self.cooldown_ms as f64 / s.cooldown_multiplier) as u64;
        if self.cooldown_ms < s.initial_cooldown_ms {
            self.cooldown_ms = 0;
            self.level = 0;
        }
        debug!(level = self.level, cooldown_ms = self.cooldown_ms, "cooldown decayed");
    }

    fn back_off(&mut self, now: Instant) {
        self.transient_streak += 1;
        let s = &self.settings;
        let factor = 2u64.saturating_pow(self.transient_streak - 1);
        let backoff = s.backoff_base_ms.saturating_mul(factor).min(s.max_cooldown_ms);
        self.block_for(now, Duration::from_millis(backoff));
        debug!(streak = self.transient_streak, backoff_ms = backoff, "transient backoff");
    }

    fn sample_delay(&self) -> Duration {
        let s = &self.settings;
        let (low, high) = (s.min_delay_ms.min(s.max_delay_ms), s.max_delay_ms);
        let jitter = rand::rng().random_range(low..=high);
        let penalty = u64::from(self.level).saturating_mul(high);
        Duration::from_millis(jitter.saturating_add(penalty))
    }
}

/// Budget and pacing gate shared by the run loop and manual submissions.
pub struct ActionScheduler {
    offset: FixedOffset,
    inner: Mutex<Inner>,
}

impl ActionScheduler {
    /// `applied_today` seeds the daily counter for `today`, so a restart does
    /// not hand out a fresh budget.
    pub fn new(
        settings: SchedulerSettings,
        limits: BudgetLimits,
        offset: FixedOffset,
        today: NaiveDate,
        applied_today: u32,
    ) -> Self {
        Self {
            offset,
            inner: Mutex::new(Inner {
                settings,
                limits,
                day: today,
                applied_today,
                applied_session: 0,
                outstanding: HashSet::new(),
                next_permit: 0,
                level: 0,
                cooldown_ms: 0,
                blocked_until: None,
                transient_streak: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets the session counter and applies a run's settings. Cooldown
    /// state carries over between sessions.
    pub fn begin_session(&self, settings: SchedulerSettings, limits: BudgetLimits) {
        let mut inner = self.lock();
        inner.settings = settings;
        inner.limits = limits;
        inner.applied_session = 0;
        inner.transient_streak = 0;
    }

    pub fn authorize(&self) -> Authorization {
        self.authorize_at(Instant::now(), Utc::now())
    }

    pub fn authorize_at(&self, now: Instant, wall: DateTime<Utc>) -> Authorization {
        let local = wall.with_timezone(&self.offset);
        let mut inner = self.lock();
        inner.roll_day(local.date_naive());

        if inner.applied_today + inner.reserved() >= inner.limits.per_day {
            let wait = local
                .date_naive()
                .checked_add_days(Days::new(1))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .and_then(|midnight| (midnight - local.naive_local()).to_std().ok())
                .unwrap_or_default();
            return Authorization::Denied {
                reason: DenyReason::DailyBudgetExhausted,
                wait,
            };
        }
        if inner.applied_session + inner.reserved() >= inner.limits.per_session {
            return Authorization::Denied {
                reason: DenyReason::SessionBudgetExhausted,
                wait: Duration::ZERO,
            };
        }
        let remaining = inner.remaining(now);
        if !remaining.is_zero() {
            return Authorization::Denied {
                reason: DenyReason::Cooldown,
                wait: remaining,
            };
        }

        let delay = inner.sample_delay();
        let id = inner.next_permit;
        inner.next_permit += 1;
        inner.outstanding.insert(id);
        Authorization::Granted {
            delay,
            permit: Permit { id },
        }
    }

    pub fn record_outcome(&self, permit: Permit, outcome: ActionOutcome) {
        self.record_outcome_at(permit, outcome, Instant::now());
    }

    pub fn record_outcome_at(&self, permit: Permit, outcome: ActionOutcome, now: Instant) {
        let mut inner = self.lock();
        if !inner.outstanding.remove(&permit.id) {
            warn!(permit = permit.id, "permit resolved twice or unknown");
            return;
        }

        match outcome {
            ActionOutcome::Succeeded => {
                inner.applied_today += 1;
                inner.applied_session += 1;
                inner.transient_streak = 0;
                inner.decay();
            }
            ActionOutcome::RateLimited { retry_after } => {
                inner.transient_streak = 0;
                inner.escalate(now, retry_after);
            }
            ActionOutcome::TransientFailure => inner.back_off(now),
            ActionOutcome::Skipped | ActionOutcome::Failed => inner.transient_streak = 0,
            ActionOutcome::Abandoned => {}
        }
    }

    /// Escalates the cooldown for a rate-limit signal that arrived outside a
    /// permitted action, such as during discovery.
    pub fn record_rate_limit(&self, retry_after: Option<Duration>) {
        self.record_rate_limit_at(retry_after, Instant::now());
    }

    pub fn record_rate_limit_at(&self, retry_after: Option<Duration>, now: Instant) {
        let mut inner = self.lock();
        inner.transient_streak = 0;
        inner.escalate(now, retry_after);
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> BudgetSnapshot {
        let inner = self.lock();
        BudgetSnapshot {
            applied_today: inner.applied_today,
            applied_this_session: inner.applied_session,
            reserved: inner.reserved(),
            max_per_day: inner.limits.per_day,
            max_per_session: inner.limits.per_session,
            escalation_level: inner.level,
            cooldown_ms: inner.cooldown_ms,
            cooldown_remaining_ms: inner.remaining(now).as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Offset, TimeZone};

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
            ..Default::default()
        }
    }

    fn wall() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn scheduler(per_day: u32, per_session: u32, applied_today: u32) -> ActionScheduler {
        ActionScheduler::new(
            settings(),
            BudgetLimits {
                per_day,
                per_session,
            },
            Utc.fix(),
            wall().date_naive(),
            applied_today,
        )
    }

    fn grant(s: &ActionScheduler, now: Instant) -> (Duration, Permit) {
        match s.authorize_at(now, wall()) {
            Authorization::Granted { delay, permit } => (delay, permit),
            other => panic!("expected grant, got {other:?}"),
        }
    }

    fn denial(s: &ActionScheduler, now: Instant) -> (DenyReason, Duration) {
        match s.authorize_at(now, wall()) {
            Authorization::Denied { reason, wait } => (reason, wait),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn baseline_delay_stays_within_bounds() {
        let s = scheduler(1_000, 1_000, 0);
        let now = Instant::now();
        for _ in 0..200 {
            let (delay, permit) = grant(&s, now);
            assert!(delay >= Duration::from_millis(1_000) && delay <= Duration::from_millis(3_000));
            s.record_outcome_at(permit, ActionOutcome::Skipped, now);
        }
    }

    #[test]
    fn escalated_delay_exceeds_every_baseline_delay() {
        let s = scheduler(1_000, 1_000, 0);
        let now = Instant::now();
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::RateLimited { retry_after: None }, now);

        let later = now + Duration::from_millis(settings().initial_cooldown_ms);
        for _ in 0..50 {
            let (delay, permit) = grant(&s, later);
            assert!(delay > Duration::from_millis(3_000), "delay was {delay:?}");
            s.record_outcome_at(permit, ActionOutcome::Skipped, later);
        }
    }

    #[test]
    fn session_budget_denies_with_zero_wait() {
        let s = scheduler(10, 2, 0);
        let now = Instant::now();
        for _ in 0..2 {
            let (_, permit) = grant(&s, now);
            s.record_outcome_at(permit, ActionOutcome::Succeeded, now);
        }
        assert_eq!(denial(&s, now), (DenyReason::SessionBudgetExhausted, Duration::ZERO));
    }

    #[test]
    fn daily_budget_waits_until_midnight() {
        let s = scheduler(3, 3, 3);
        let (reason, wait) = denial(&s, Instant::now());
        assert_eq!(reason, DenyReason::DailyBudgetExhausted);
        assert_eq!(wait, Duration::from_secs(12 * 3600));
        assert!(reason.is_budget());
    }

    #[test]
    fn daily_counter_resets_on_rollover() {
        let s = scheduler(1, 5, 1);
        let now = Instant::now();
        let next_day = wall() + chrono::Duration::hours(13);
        assert!(matches!(
            s.authorize_at(now, next_day),
            Authorization::Granted { .. }
        ));
        assert_eq!(s.snapshot_at(now).applied_today, 0);
    }

    #[test]
    fn rollover_follows_the_configured_offset() {
        // 12:00 UTC is already the next day at UTC+13.
        let s = ActionScheduler::new(
            settings(),
            BudgetLimits {
                per_day: 1,
                per_session: 5,
            },
            FixedOffset::east_opt(13 * 3600).unwrap(),
            wall().date_naive(),
            1,
        );
        assert!(matches!(
            s.authorize_at(Instant::now(), wall()),
            Authorization::Granted { .. }
        ));
    }

    #[test]
    fn outstanding_permits_reserve_budget() {
        let s = scheduler(2, 2, 0);
        let now = Instant::now();
        let (_, first) = grant(&s, now);
        let (_, second) = grant(&s, now);
        assert!(matches!(denial(&s, now).0, DenyReason::DailyBudgetExhausted));

        s.record_outcome_at(first, ActionOutcome::Failed, now);
        let (_, third) = grant(&s, now);
        s.record_outcome_at(second, ActionOutcome::Succeeded, now);
        s.record_outcome_at(third, ActionOutcome::Succeeded, now);

        let snap = s.snapshot_at(now);
        assert_eq!(snap.applied_today, 2);
        assert_eq!(snap.reserved, 0);
        assert!(snap.applied_today <= snap.max_per_day);
    }

    #[test]
    fn third_rate_limit_raises_cooldown_before_next_grant() {
        let s = scheduler(100, 100, 0);
        let mut now = Instant::now();
        let mut windows = Vec::new();

        for _ in 0..3 {
            let (_, permit) = grant(&s, now);
            s.record_outcome_at(permit, ActionOutcome::RateLimited { retry_after: None }, now);
            let (reason, wait) = denial(&s, now);
            assert_eq!(reason, DenyReason::Cooldown);
            windows.push(wait);
            now += wait;
        }

        assert_eq!(
            windows,
            vec![
                Duration::from_millis(180_000),
                Duration::from_millis(360_000),
                Duration::from_millis(720_000),
            ]
        );
        assert_eq!(s.snapshot_at(now).escalation_level, 3);
    }

    #[test]
    fn rate_limit_outside_a_permit_escalates_the_same_cooldown() {
        let s = scheduler(100, 100, 0);
        let now = Instant::now();
        s.record_rate_limit_at(None, now);
        assert_eq!(denial(&s, now), (DenyReason::Cooldown, Duration::from_millis(180_000)));

        let later = now + Duration::from_millis(180_000);
        s.record_rate_limit_at(Some(Duration::from_secs(60)), later);
        assert_eq!(denial(&s, later).1, Duration::from_millis(360_000));
        let snap = s.snapshot_at(later);
        assert_eq!(snap.escalation_level, 2);
        assert_eq!(snap.reserved, 0);
    }

    #[test]
    fn cooldown_is_capped() {
        let s = scheduler(100, 100, 0);
        let mut now = Instant::now();
        for _ in 0..10 {
            let (_, permit) = grant(&s, now);
            s.record_outcome_at(permit, ActionOutcome::RateLimited { retry_after: None }, now);
            now += Duration::from_millis(s.snapshot_at(now).cooldown_remaining_ms);
        }
        assert_eq!(s.snapshot_at(now).cooldown_ms, 1_800_000);
    }

    #[test]
    fn retry_after_extends_the_window() {
        let s = scheduler(100, 100, 0);
        let now = Instant::now();
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(
            permit,
            ActionOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(600)),
            },
            now,
        );
        assert_eq!(denial(&s, now).1, Duration::from_secs(600));
    }

    #[test]
    fn successes_decay_back_to_baseline() {
        let s = scheduler(100, 100, 0);
        let mut now = Instant::now();
        for _ in 0..2 {
            let (_, permit) = grant(&s, now);
            s.record_outcome_at(permit, ActionOutcome::RateLimited { retry_after: None }, now);
            now += Duration::from_millis(s.snapshot_at(now).cooldown_remaining_ms);
        }
        assert_eq!(s.snapshot_at(now).cooldown_ms, 360_000);

        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::Succeeded, now);
        let snap = s.snapshot_at(now);
        assert_eq!((snap.escalation_level, snap.cooldown_ms), (1, 180_000));

        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::Succeeded, now);
        let snap = s.snapshot_at(now);
        assert_eq!((snap.escalation_level, snap.cooldown_ms), (0, 0));
    }

    #[test]
    fn transient_failures_back_off_without_escalating() {
        let s = scheduler(100, 100, 0);
        let now = Instant::now();
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::TransientFailure, now);
        assert_eq!(denial(&s, now), (DenyReason::Cooldown, Duration::from_millis(5_000)));

        let later = now + Duration::from_millis(5_000);
        let (_, permit) = grant(&s, later);
        s.record_outcome_at(permit, ActionOutcome::TransientFailure, later);
        assert_eq!(denial(&s, later).1, Duration::from_millis(10_000));
        assert_eq!(s.snapshot_at(later).escalation_level, 0);
    }

    #[test]
    fn abandoned_permit_releases_without_counting() {
        let s = scheduler(1, 1, 0);
        let now = Instant::now();
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::Abandoned, now);
        let snap = s.snapshot_at(now);
        assert_eq!((snap.applied_today, snap.reserved), (0, 0));
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::Succeeded, now);
    }

    #[test]
    fn begin_session_resets_only_the_session_counter() {
        let s = scheduler(10, 1, 0);
        let now = Instant::now();
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::Succeeded, now);
        assert_eq!(denial(&s, now).0, DenyReason::SessionBudgetExhausted);

        s.begin_session(
            settings(),
            BudgetLimits {
                per_day: 10,
                per_session: 1,
            },
        );
        let snap = s.snapshot_at(now);
        assert_eq!((snap.applied_today, snap.applied_this_session), (1, 0));
        let (_, permit) = grant(&s, now);
        s.record_outcome_at(permit, ActionOutcome::Skipped, now);
    }
}
