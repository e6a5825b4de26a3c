use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::record::LogEntry;
use crate::error::{HireloopError, TransitionError};
use crate::store::PersistentStore;

/// Lifecycle of a candidate within one run.
///
/// Discovered → Scored → {Skipped | Queued} → Applying → {Applied | Failed | RateLimited | Skipped}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Discovered,
    Scored,
    Skipped,
    Queued,
    Applying,
    Applied,
    Failed,
    RateLimited,
}

impl CandidateState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CandidateState::Applied | CandidateState::Failed | CandidateState::Skipped
        )
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition(self, to: CandidateState) -> bool {
        use CandidateState::*;
        matches!(
            (self, to),
            (Discovered, Scored)
                | (Scored, Skipped)
                | (Scored, Queued)
                | (Queued, Applying)
                | (Applying, Applied)
                | (Applying, Failed)
                | (Applying, RateLimited)
                | (Applying, Skipped)
                | (Applying, Queued)
                | (RateLimited, Queued)
                | (RateLimited, Failed)
        )
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateState::Discovered => write!(f, "discovered"),
            CandidateState::Scored => write!(f, "scored"),
            CandidateState::Skipped => write!(f, "skipped"),
            CandidateState::Queued => write!(f, "queued"),
            CandidateState::Applying => write!(f, "applying"),
            CandidateState::Applied => write!(f, "applied"),
            CandidateState::Failed => write!(f, "failed"),
            CandidateState::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// The result of resolving a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The candidate went back to `Queued`; `attempt` is the retry number.
    Retry { attempt: u32 },
    /// Retries are exhausted and the candidate is `Failed`.
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    state: CandidateState,
    retries: u32,
}

/// Tracks every candidate of one run and audits each transition.
///
/// The audit entry is persisted before the in-memory state moves, so the log
/// repository never lags behind what the run believes.
pub struct ApplicationStateMachine {
    run_id: Uuid,
    max_retries: u32,
    store: Arc<PersistentStore>,
    tracked: HashMap<String, Tracked>,
}

impl ApplicationStateMachine {
    pub fn new(run_id: Uuid, max_retries: u32, store: Arc<PersistentStore>) -> Self {
        Self {
            run_id,
            max_retries,
            store,
            tracked: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self, candidate_id: &str) -> Option<CandidateState> {
        self.tracked.get(candidate_id).map(|t| t.state)
    }

    pub fn retries(&self, candidate_id: &str) -> u32 {
        self.tracked.get(candidate_id).map_or(0, |t| t.retries)
    }

    /// Starts tracking a freshly discovered candidate.
    pub fn discover(&mut self, candidate_id: &str) -> Result<(), HireloopError> {
        self.enter(candidate_id, CandidateState::Discovered, "discovered")
    }

    /// Starts tracking a candidate submitted by the operator, bypassing scoring.
    pub fn admit_manual(&mut self, candidate_id: &str) -> Result<(), HireloopError> {
        self.enter(candidate_id, CandidateState::Queued, "manual submission")
    }

    fn enter(
        &mut self,
        candidate_id: &str,
        state: CandidateState,
        reason: &str,
    ) -> Result<(), HireloopError> {
        if self.tracked.contains_key(candidate_id) {
            return Err(TransitionError::AlreadyTracked(candidate_id.to_string()).into());
        }
        self.store
            .append_log(LogEntry::transition(self.run_id, candidate_id, None, state, reason))?;
        self.tracked
            .insert(candidate_id.to_string(), Tracked { state, retries: 0 });
        Ok(())
    }

    /// Moves a candidate along one edge, writing the audit entry first.
    ///
    /// Re-entering `Queued` after a failure consumes one retry; once the cap is
    /// reached that edge is refused and the candidate must go to `Failed`.
    pub fn transition(
        &mut self,
        candidate_id: &str,
        to: CandidateState,
        reason: &str,
    ) -> Result<CandidateState, HireloopError> {
        let current = *self
            .tracked
            .get(candidate_id)
            .ok_or_else(|| TransitionError::Untracked(candidate_id.to_string()))?;

        let is_retry = to == CandidateState::Queued
            && matches!(
                current.state,
                CandidateState::Applying | CandidateState::RateLimited
            );
        if !current.state.can_transition(to) || (is_retry && current.retries >= self.max_retries)
        {
            return Err(TransitionError::Illegal {
                candidate_id: candidate_id.to_string(),
                from: current.state,
                to,
            }
            .into());
        }

        self.store.append_log(LogEntry::transition(
            self.run_id,
            candidate_id,
            Some(current.state),
            to,
            reason,
        ))?;
        debug!(run_id = %self.run_id, candidate_id, from = %current.state, %to, reason, "transition");

        let tracked = self
            .tracked
            .get_mut(candidate_id)
            .ok_or_else(|| TransitionError::Untracked(candidate_id.to_string()))?;
        tracked.state = to;
        if is_retry {
            tracked.retries += 1;
        }
        Ok(current.state)
    }

    /// Sends a candidate that failed retryably back to `Queued`, or to `Failed`
    /// once `max_retries` re-queues have been spent in this run.
    pub fn retry_or_fail(
        &mut self,
        candidate_id: &str,
        reason: &str,
    ) -> Result<Transition, HireloopError> {
        let retries = self.retries(candidate_id);
        if retries < self.max_retries {
            self.transition(candidate_id, CandidateState::Queued, reason)?;
            Ok(Transition::Retry {
                attempt: retries + 1,
            })
        } else {
            let reason = format!("{reason} (retries exhausted after {retries})");
            self.transition(candidate_id, CandidateState::Failed, &reason)?;
            Ok(Transition::Exhausted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn machine(max_retries: u32) -> (TempDir, Arc<PersistentStore>, ApplicationStateMachine) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(PersistentStore::open(dir.path()).unwrap());
        let sm = ApplicationStateMachine::new(Uuid::new_v4(), max_retries, store.clone());
        (dir, store, sm)
    }

    fn to_applying(sm: &mut ApplicationStateMachine, id: &str) {
        sm.discover(id).unwrap();
        sm.transition(id, CandidateState::Scored, "score 0.9").unwrap();
        sm.transition(id, CandidateState::Queued, "eligible").unwrap();
        sm.transition(id, CandidateState::Applying, "authorized").unwrap();
    }

    #[test]
    fn happy_path_walks_all_states() {
        let (_dir, store, mut sm) = machine(3);
        to_applying(&mut sm, "a");
        let from = sm
            .transition("a", CandidateState::Applied, "submitted")
            .unwrap();

        assert_eq!(from, CandidateState::Applying);
        assert_eq!(sm.state("a"), Some(CandidateState::Applied));
        assert!(CandidateState::Applied.is_terminal());

        let trail: Vec<Option<CandidateState>> =
            store.logs(None).iter().map(|e| e.to_state).collect();
        assert_eq!(
            trail,
            vec![
                Some(CandidateState::Discovered),
                Some(CandidateState::Scored),
                Some(CandidateState::Queued),
                Some(CandidateState::Applying),
                Some(CandidateState::Applied),
            ]
        );
    }

    #[test]
    fn every_transition_is_audited_with_from_state() {
        let (_dir, store, mut sm) = machine(3);
        sm.discover("a").unwrap();
        sm.transition("a", CandidateState::Scored, "score 0.0").unwrap();
        sm.transition("a", CandidateState::Skipped, "excluded organization")
            .unwrap();

        let last = store.logs(None).pop().unwrap();
        assert_eq!(last.candidate_id.as_deref(), Some("a"));
        assert_eq!(last.from_state, Some(CandidateState::Scored));
        assert_eq!(last.to_state, Some(CandidateState::Skipped));
        assert_eq!(last.run_id, Some(sm.run_id()));
        assert!(last.message.contains("excluded organization"));
    }

    #[test]
    fn illegal_transition_is_refused_and_not_audited() {
        let (_dir, store, mut sm) = machine(3);
        sm.discover("a").unwrap();
        let err = sm
            .transition("a", CandidateState::Applying, "skip the queue")
            .unwrap_err();

        assert!(matches!(
            err,
            HireloopError::Transition(TransitionError::Illegal { .. })
        ));
        assert_eq!(sm.state("a"), Some(CandidateState::Discovered));
        assert_eq!(store.logs(None).len(), 1);
    }

    #[test]
    fn terminal_states_are_final() {
        let (_dir, _store, mut sm) = machine(3);
        to_applying(&mut sm, "a");
        sm.transition("a", CandidateState::Failed, "form rejected")
            .unwrap();
        assert!(
            sm.transition("a", CandidateState::Queued, "try again")
                .is_err()
        );
    }

    #[test]
    fn rate_limited_requeues_until_retries_run_out() {
        let (_dir, _store, mut sm) = machine(2);
        to_applying(&mut sm, "a");

        sm.transition("a", CandidateState::RateLimited, "429").unwrap();
        assert_eq!(
            sm.retry_or_fail("a", "cooldown elapsed").unwrap(),
            Transition::Retry { attempt: 1 }
        );
        sm.transition("a", CandidateState::Applying, "authorized").unwrap();
        sm.transition("a", CandidateState::RateLimited, "429").unwrap();
        assert_eq!(
            sm.retry_or_fail("a", "cooldown elapsed").unwrap(),
            Transition::Retry { attempt: 2 }
        );
        sm.transition("a", CandidateState::Applying, "authorized").unwrap();
        sm.transition("a", CandidateState::RateLimited, "429").unwrap();

        assert_eq!(
            sm.retry_or_fail("a", "cooldown elapsed").unwrap(),
            Transition::Exhausted
        );
        assert_eq!(sm.state("a"), Some(CandidateState::Failed));
        assert_eq!(sm.retries("a"), 2);
    }

    #[test]
    fn zero_retries_fails_immediately() {
        let (_dir, _store, mut sm) = machine(0);
        to_applying(&mut sm, "a");
        assert_eq!(
            sm.retry_or_fail("a", "network error").unwrap(),
            Transition::Exhausted
        );
        assert_eq!(sm.state("a"), Some(CandidateState::Failed));
    }

    #[test]
    fn direct_requeue_past_the_cap_is_illegal() {
        let (_dir, _store, mut sm) = machine(0);
        to_applying(&mut sm, "a");
        assert!(
            sm.transition("a", CandidateState::Queued, "transient")
                .is_err()
        );
    }

    #[test]
    fn manual_admission_starts_queued() {
        let (_dir, store, mut sm) = machine(1);
        sm.admit_manual("m").unwrap();
        assert_eq!(sm.state("m"), Some(CandidateState::Queued));
        assert_eq!(store.logs(None)[0].from_state, None);
        assert!(sm.admit_manual("m").is_err());
    }

    #[test]
    fn untracked_candidate_is_an_error() {
        let (_dir, _store, mut sm) = machine(1);
        let err = sm
            .transition("ghost", CandidateState::Scored, "x")
            .unwrap_err();
        assert!(matches!(
            err,
            HireloopError::Transition(TransitionError::Untracked(_))
        ));
    }

    #[test]
    fn state_display() {
        assert_eq!(CandidateState::RateLimited.to_string(), "rate_limited");
        assert_eq!(CandidateState::Queued.to_string(), "queued");
    }
}
