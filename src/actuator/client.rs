use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use super::error::ActuatorError;
use super::types::{
    ApplicantProfile, ApplicationOutcome, ApplyRequest, DiscoverResponse, SearchCriteria,
};
use super::Actuator;
use crate::state_machine::{JobCandidate, Posting};

const DEFAULT_RETRY_AFTER_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Discover,
    Apply,
}

/// Actuator backed by an external automation service speaking JSON over HTTP.
pub struct HttpActuator {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpActuator {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, ActuatorError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}/{path}", self.endpoint));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn discover(&self, criteria: &SearchCriteria) -> Result<Vec<Posting>, ActuatorError> {
        let response = self.post("discover").json(criteria).send().await?;
        let response = check_status(response, Operation::Discover).await?;
        let body = response
            .json::<DiscoverResponse>()
            .await
            .map_err(|e| ActuatorError::Scraping(format!("undecodable discover response: {e}")))?;
        debug!(page = criteria.page, count = body.postings.len(), "postings discovered");
        Ok(body.postings)
    }

    async fn apply(
        &self,
        candidate: &JobCandidate,
        profile: &ApplicantProfile,
    ) -> Result<ApplicationOutcome, ActuatorError> {
        let response = self
            .post("apply")
            .json(&ApplyRequest { candidate, profile })
            .send()
            .await?;
        let response = check_status(response, Operation::Apply).await?;
        // A 2xx is a submission even when the body is unreadable.
        match response.json::<ApplicationOutcome>().await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(candidate_id = %candidate.id, error = %err, "apply accepted with undecodable body");
                Ok(ApplicationOutcome::Submitted { confirmation: None })
            }
        }
    }
}

async fn check_status(response: Response, op: Operation) -> Result<Response, ActuatorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ActuatorError::RateLimited {
            retry_after_ms: retry_after_ms(response.headers()),
        });
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    let message = format!("status {}: {message}", status.as_u16());
    Err(match (status, op) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => ActuatorError::Auth(message),
        (
            StatusCode::BAD_REQUEST
            | StatusCode::NOT_FOUND
            | StatusCode::CONFLICT
            | StatusCode::UNPROCESSABLE_ENTITY,
            Operation::Apply,
        ) => ActuatorError::Application(message),
        (_, Operation::Discover) => ActuatorError::Scraping(message),
        (_, Operation::Apply) => ActuatorError::Network(message),
    })
}

fn retry_after_ms(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(DEFAULT_RETRY_AFTER_MS)
}
