use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::CandidateState;
use crate::error::ErrorClass;

/// Result of a single application attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// One row per application attempt. Retries append new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub candidate_id: String,
    /// `None` for manual submissions made outside a run.
    pub run_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub attempt: u32,
}

impl ApplicationRecord {
    pub fn new(
        candidate_id: impl Into<String>,
        run_id: Option<Uuid>,
        attempt: u32,
        outcome: AttemptOutcome,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id: candidate_id.into(),
            run_id,
            submitted_at: Utc::now(),
            outcome,
            latency_ms,
            error: None,
            message: None,
            attempt,
        }
    }

    pub fn with_error(mut self, class: ErrorClass, message: impl Into<String>) -> Self {
        self.error = Some(class);
        self.message = Some(message.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Audit/log row shown in the console's log view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub module: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_state: Option<CandidateState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_state: Option<CandidateState>,
}

impl LogEntry {
    pub fn new(level: LogLevel, module: &str, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            module: module.to_string(),
            message: message.into(),
            run_id: None,
            candidate_id: None,
            from_state: None,
            to_state: None,
        }
    }

    /// Audit row for a lifecycle transition.
    pub fn transition(
        run_id: Uuid,
        candidate_id: &str,
        from: Option<CandidateState>,
        to: CandidateState,
        reason: &str,
    ) -> Self {
        let level = match to {
            CandidateState::Failed | CandidateState::RateLimited => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        let message = match from {
            Some(from) => format!("{from} -> {to}: {reason}"),
            None => format!("-> {to}: {reason}"),
        };
        Self {
            run_id: Some(run_id),
            candidate_id: Some(candidate_id.to_string()),
            from_state: from,
            to_state: Some(to),
            ..Self::new(level, "state_machine", message)
        }
    }

    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn for_candidate(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = Some(candidate_id.into());
        self
    }
}
