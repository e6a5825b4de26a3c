//! Fixtures and a scripted [`Actuator`] double shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

use crate::actuator::{
    Actuator, ActuatorError, ApplicantProfile, ApplicationOutcome, SearchCriteria,
};
use crate::config::Config;
use crate::state_machine::{JobCandidate, Posting};

/// A posting that passes default preferences for the keyword "rust".
pub fn posting(id: &str) -> Posting {
    Posting {
        external_id: Some(id.to_string()),
        title: format!("Rust Engineer {id}"),
        organization: format!("Org {id}"),
        location: "Sydney NSW".into(),
        compensation: None,
        posting_age_days: 1,
        description: "We are hiring an engineer to build reliable backend services in Rust. \
                      You will own storage, networking and deployment end to end."
            .into(),
        url: None,
    }
}

pub fn candidate(id: &str) -> JobCandidate {
    let discovered = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().unwrap_or_default();
    JobCandidate::from_posting(posting(id), discovered)
}

/// A config that validates, with data under `dir` and short pacing.
pub fn runnable_config(dir: &Path) -> Config {
    let resume = dir.join("resume.pdf");
    fs::write(&resume, b"%PDF-1.7").unwrap();

    let mut config = Config::default();
    config.user.agreement_accepted = true;
    config.preferences.keywords = vec!["rust".into()];
    config.application.resume_path = resume.display().to_string();
    config.application.data_dir = dir.join("data");
    config.scheduler.min_delay_ms = 1_000;
    config.scheduler.max_delay_ms = 2_000;
    config.discovery.backoff_base_ms = 500;
    config
}

type ApplyResult = Result<ApplicationOutcome, ActuatorError>;

/// Actuator double that replays scripted results.
///
/// Discovery pops one scripted page per call and returns an empty page once
/// the script runs out. Apply consults the per-candidate script first, then
/// the shared script, and submits successfully when both are empty.
#[derive(Default)]
pub struct ScriptedActuator {
    pages: Mutex<VecDeque<Result<Vec<Posting>, ActuatorError>>>,
    shared: Mutex<VecDeque<ApplyResult>>,
    per_candidate: Mutex<HashMap<String, VecDeque<ApplyResult>>>,
    attempts: Mutex<Vec<String>>,
    discover_calls: AtomicU32,
    apply_latency: Duration,
    /// Signalled whenever an apply call begins.
    pub apply_started: Notify,
}

impl ScriptedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_apply_latency(mut self, latency: Duration) -> Self {
        self.apply_latency = latency;
        self
    }

    pub fn page(self, postings: Vec<Posting>) -> Self {
        self.push_page(Ok(postings));
        self
    }

    pub fn page_error(self, err: ActuatorError) -> Self {
        self.push_page(Err(err));
        self
    }

    fn push_page(&self, page: Result<Vec<Posting>, ActuatorError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    /// Next apply call, whichever candidate it is for.
    pub fn then_apply(self, result: ApplyResult) -> Self {
        self.shared.lock().unwrap().push_back(result);
        self
    }

    pub fn apply_for(self, candidate_id: &str, result: ApplyResult) -> Self {
        self.per_candidate
            .lock()
            .unwrap()
            .entry(candidate_id.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Candidate ids in the order apply was called.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn discover_calls(&self) -> u32 {
        self.discover_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Actuator for ScriptedActuator {
    async fn discover(&self, _criteria: &SearchCriteria) -> Result<Vec<Posting>, ActuatorError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn apply(
        &self,
        candidate: &JobCandidate,
        _profile: &ApplicantProfile,
    ) -> Result<ApplicationOutcome, ActuatorError> {
        self.attempts.lock().unwrap().push(candidate.id.clone());
        self.apply_started.notify_one();
        if !self.apply_latency.is_zero() {
            tokio::time::sleep(self.apply_latency).await;
        }

        let scripted = self
            .per_candidate
            .lock()
            .unwrap()
            .get_mut(&candidate.id)
            .and_then(VecDeque::pop_front);
        let scripted = scripted.or_else(|| self.shared.lock().unwrap().pop_front());
        scripted.unwrap_or_else(|| {
            Ok(ApplicationOutcome::Submitted {
                confirmation: Some(format!("conf-{}", candidate.id)),
            })
        })
    }
}
