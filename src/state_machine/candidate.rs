use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advertised pay band, in whole currency units per year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRange {
    pub min: u32,
    pub max: u32,
}

impl CompensationRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }
}

/// A posting exactly as the actuator reported it, before it gets a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    #[serde(default)]
    pub external_id: Option<String>,
    pub title: String,
    pub organization: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub compensation: Option<CompensationRange>,
    #[serde(default)]
    pub posting_age_days: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Posting {
    /// Identity used for deduplication across runs.
    ///
    /// The source's own id wins when present. Otherwise the posting is keyed by a
    /// name-based UUID over its normalized title, organization and location, so
    /// the same listing rediscovered later maps to the same candidate.
    pub fn stable_id(&self) -> String {
        if let Some(id) = self.external_id.as_deref().map(str::trim)
            && !id.is_empty()
        {
            return id.to_string();
        }
        let key = format!(
            "{}|{}|{}",
            normalize(&self.title),
            normalize(&self.organization),
            normalize(&self.location)
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Persisted result for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOutcome {
    #[default]
    Pending,
    Applied,
    Failed,
    Skipped,
}

impl CandidateOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CandidateOutcome::Pending)
    }
}

impl std::fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateOutcome::Pending => write!(f, "pending"),
            CandidateOutcome::Applied => write!(f, "applied"),
            CandidateOutcome::Failed => write!(f, "failed"),
            CandidateOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// A discovered posting under consideration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCandidate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub title: String,
    pub organization: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationRange>,
    pub posting_age_days: u32,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub match_score: Option<f64>,
    #[serde(default)]
    pub outcome: CandidateOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Run that wrote `match_score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scored_in_run: Option<Uuid>,
    /// Run (or manual submission) that wrote `outcome`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_run_id: Option<Uuid>,
    pub discovered_at: DateTime<Utc>,
}

impl JobCandidate {
    pub fn from_posting(posting: Posting, discovered_at: DateTime<Utc>) -> Self {
        let id = posting.stable_id();
        Self {
            id,
            external_id: posting.external_id,
            title: posting.title,
            organization: posting.organization,
            location: posting.location,
            compensation: posting.compensation,
            posting_age_days: posting.posting_age_days,
            description: posting.description,
            url: posting.url,
            match_score: None,
            outcome: CandidateOutcome::Pending,
            skip_reason: None,
            scored_in_run: None,
            outcome_run_id: None,
            discovered_at,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.outcome == CandidateOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(external_id: Option<&str>) -> Posting {
        Posting {
            external_id: external_id.map(String::from),
            title: "Senior Rust Engineer".into(),
            organization: "Acme".into(),
            location: "Sydney NSW".into(),
            compensation: Some(CompensationRange::new(150_000, 180_000)),
            posting_age_days: 2,
            description: "Build storage engines in Rust.".into(),
            url: None,
        }
    }

    #[test]
    fn external_id_is_the_stable_id() {
        assert_eq!(posting(Some(" 81234567 ")).stable_id(), "81234567");
    }

    #[test]
    fn blank_external_id_falls_back_to_content_hash() {
        let a = posting(Some("   ")).stable_id();
        let b = posting(None).stable_id();
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn content_hash_ignores_case_and_spacing() {
        let mut other = posting(None);
        other.title = "  senior   RUST engineer ".into();
        other.organization = "ACME".into();
        assert_eq!(other.stable_id(), posting(None).stable_id());

        other.location = "Melbourne VIC".into();
        assert_ne!(other.stable_id(), posting(None).stable_id());
    }

    #[test]
    fn compensation_range_orders_bounds() {
        let range = CompensationRange::new(200, 100);
        assert_eq!((range.min, range.max), (100, 200));
    }

    #[test]
    fn new_candidate_is_pending_and_unscored() {
        let candidate = JobCandidate::from_posting(posting(Some("42")), Utc::now());
        assert_eq!(candidate.id, "42");
        assert_eq!(candidate.outcome, CandidateOutcome::Pending);
        assert!(candidate.match_score.is_none());
        assert!(!candidate.outcome.is_terminal());
    }

    #[test]
    fn posting_deserializes_with_defaults() {
        let json = r#"{"title":"Dev","organization":"Org"}"#;
        let posting: Posting = serde_json::from_str(json).unwrap();
        assert_eq!(posting.posting_age_days, 0);
        assert!(posting.description.is_empty());
        assert!(posting.compensation.is_none());
    }
}
