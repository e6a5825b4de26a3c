use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actuator::ActuatorError;
use crate::state_machine::{CandidateOutcome, CandidateState};

#[derive(Debug, Error)]
pub enum HireloopError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Configuration rejected: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("State transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, HireloopError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize repository: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Candidate {candidate_id} already has outcome {current}; refusing to write {attempted}")]
    OutcomeConflict {
        candidate_id: String,
        current: CandidateOutcome,
        attempted: CandidateOutcome,
    },

    #[error("Candidate {candidate_id} was already scored {current:.3} in this run")]
    ScoreConflict { candidate_id: String, current: f64 },

    #[error("Candidate not found: {0}")]
    CandidateNotFound(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Illegal transition for {candidate_id}: {from} -> {to}")]
    Illegal {
        candidate_id: String,
        from: CandidateState,
        to: CandidateState,
    },

    #[error("Candidate {0} is not tracked in this run")]
    Untracked(String),

    #[error("Candidate {0} is already tracked in this run")]
    AlreadyTracked(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("A run is already active")]
    RunActive,

    #[error("Candidate {0} was already applied to")]
    AlreadyApplied(String),

    #[error("Action not authorized ({reason}), retry in {wait_ms}ms")]
    NotAuthorized { reason: String, wait_ms: u64 },
}

/// Classifies an actuator failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Aborts the run (authentication lost).
    Fatal,
    /// Worth retrying after a backoff (network hiccup, scrape glitch).
    Transient,
    /// Retrying will not help for this candidate.
    Permanent,
    /// The source pushed back; the scheduler must cool down.
    RateLimited,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Fatal => write!(f, "fatal"),
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::RateLimited => write!(f, "rate_limited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_problem() {
        let err = HireloopError::Validation(vec![
            "user agreement not accepted".into(),
            "at least one keyword is required".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Configuration rejected: user agreement not accepted; at least one keyword is required"
        );
    }

    #[test]
    fn outcome_conflict_display() {
        let err = StorageError::OutcomeConflict {
            candidate_id: "job-1".into(),
            current: CandidateOutcome::Applied,
            attempted: CandidateOutcome::Failed,
        };
        assert_eq!(
            err.to_string(),
            "Candidate job-1 already has outcome applied; refusing to write failed"
        );
    }

    #[test]
    fn error_class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        assert_eq!(ErrorClass::Transient.to_string(), "transient");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HireloopError>();
    }
}
