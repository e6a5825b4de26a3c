pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use client::HttpActuator;
pub use error::ActuatorError;
pub use types::{ApplicantProfile, ApplicationOutcome, SearchCriteria};

use crate::state_machine::{JobCandidate, Posting};

/// The external capability that finds postings and submits applications.
///
/// Implementations own page interaction and session handling; the engine only
/// sees postings, outcomes and classified errors.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn discover(&self, criteria: &SearchCriteria) -> Result<Vec<Posting>, ActuatorError>;

    async fn apply(
        &self,
        candidate: &JobCandidate,
        profile: &ApplicantProfile,
    ) -> Result<ApplicationOutcome, ActuatorError>;
}
