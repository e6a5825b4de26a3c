mod candidate;
mod record;
mod state;

pub use candidate::{CandidateOutcome, CompensationRange, JobCandidate, Posting};
pub use record::{ApplicationRecord, AttemptOutcome, LogEntry, LogLevel};
pub use state::{ApplicationStateMachine, CandidateState, Transition};
