use std::cmp::Ordering;

use crate::config::Preferences;
use crate::state_machine::JobCandidate;

/// Weight applied to a keyword found only in the description.
const DESCRIPTION_HIT_WEIGHT: f64 = 0.75;

/// Neutral salary sub-score when the posting discloses no pay.
const UNDISCLOSED_SALARY_SCORE: f64 = 0.5;

/// Organization sub-score when preferences name favourites and this isn't one.
const UNPREFERRED_ORGANIZATION_SCORE: f64 = 0.5;

/// Independently normalized sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub keyword: f64,
    pub location: f64,
    pub salary: f64,
    pub organization: f64,
}

/// Outcome of matching one candidate against a frozen preference snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchVerdict {
    Eligible {
        score: f64,
        breakdown: ScoreBreakdown,
    },
    /// Skipped; `score` is 0 for exclusions and the real score for
    /// below-threshold candidates.
    Excluded { score: f64, reason: String },
}

impl MatchVerdict {
    pub fn score(&self) -> f64 {
        match self {
            MatchVerdict::Eligible { score, .. } | MatchVerdict::Excluded { score, .. } => *score,
        }
    }
}

/// A candidate paired with the score used to order the queue.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: JobCandidate,
    pub score: f64,
}

/// Scores candidates against weighted preferences. Pure: no I/O, no state.
pub struct PreferenceMatcher;

impl PreferenceMatcher {
    /// Weighted match score in [0, 1]; exclusions score 0.
    pub fn score(candidate: &JobCandidate, prefs: &Preferences) -> f64 {
        match Self::evaluate(candidate, prefs) {
            MatchVerdict::Eligible { score, .. } => score,
            MatchVerdict::Excluded { .. } => 0.0,
        }
    }

    /// Full verdict, including the exclusion or threshold reason.
    pub fn evaluate(candidate: &JobCandidate, prefs: &Preferences) -> MatchVerdict {
        if let Some(reason) = Self::exclusion(candidate, prefs) {
            return MatchVerdict::Excluded { score: 0.0, reason };
        }

        let breakdown = ScoreBreakdown {
            keyword: keyword_score(candidate, &prefs.keywords),
            location: location_score(candidate, &prefs.locations),
            salary: salary_score(candidate, prefs.salary_min, prefs.salary_max),
            organization: organization_score(candidate, &prefs.preferred_organizations),
        };
        let w = prefs.weights;
        let weighted = w.keyword * breakdown.keyword
            + w.location * breakdown.location
            + w.salary * breakdown.salary
            + w.organization * breakdown.organization;
        let score = if prefs.weight_total > 0.0 {
            weighted / prefs.weight_total
        } else {
            0.0
        };
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };

        if score < prefs.min_match_score {
            return MatchVerdict::Excluded {
                score,
                reason: format!(
                    "below threshold ({score:.3} < {:.3})",
                    prefs.min_match_score
                ),
            };
        }
        MatchVerdict::Eligible { score, breakdown }
    }

    /// First exclusion rule the candidate trips, if any.
    fn exclusion(candidate: &JobCandidate, prefs: &Preferences) -> Option<String> {
        let organization = candidate.organization.to_lowercase();
        if let Some(excluded) = prefs
            .excluded_organizations
            .iter()
            .find(|o| !o.trim().is_empty() && o.trim().to_lowercase() == organization.trim())
        {
            return Some(format!("excluded organization '{excluded}'"));
        }

        let title = candidate.title.to_lowercase();
        let description = candidate.description.to_lowercase();
        if let Some(keyword) = prefs.excluded_keywords.iter().find(|k| {
            let k = k.trim().to_lowercase();
            !k.is_empty() && (title.contains(&k) || description.contains(&k))
        }) {
            return Some(format!("excluded keyword '{keyword}'"));
        }

        if let Some(benefit) = prefs.required_benefits.iter().find(|b| {
            let b = b.trim().to_lowercase();
            !b.is_empty() && !description.contains(&b)
        }) {
            return Some(format!("required benefit '{benefit}' not mentioned"));
        }

        let length = candidate.description.chars().count();
        if length < prefs.min_description_length {
            return Some(format!(
                "description too short ({length} < {} chars)",
                prefs.min_description_length
            ));
        }

        if let Some(max_age) = prefs.max_posting_age_days
            && candidate.posting_age_days > max_age
        {
            return Some(format!(
                "posting too old ({} > {max_age} days)",
                candidate.posting_age_days
            ));
        }

        None
    }

    /// Orders by score descending, then more recent posting, then id.
    pub fn rank(candidates: &mut [ScoredCandidate]) {
        candidates.sort_by(Self::compare);
    }

    fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.candidate.posting_age_days.cmp(&b.candidate.posting_age_days))
            .then_with(|| a.candidate.id.cmp(&b.candidate.id))
    }
}

fn keyword_score(candidate: &JobCandidate, keywords: &[String]) -> f64 {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return 0.0;
    }

    let title = candidate.title.to_lowercase();
    let description = candidate.description.to_lowercase();
    let hits: f64 = keywords
        .iter()
        .map(|k| {
            if title.contains(k) {
                1.0
            } else if description.contains(k) {
                DESCRIPTION_HIT_WEIGHT
            } else {
                0.0
            }
        })
        .sum();
    hits / keywords.len() as f64
}

fn location_score(candidate: &JobCandidate, locations: &[String]) -> f64 {
    let location = candidate.location.to_lowercase();
    let mut wanted = locations
        .iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .peekable();
    if wanted.peek().is_none() {
        return 1.0;
    }
    if wanted.any(|l| location.contains(&l)) {
        1.0
    } else {
        0.0
    }
}

fn salary_score(candidate: &JobCandidate, min: Option<u32>, max: Option<u32>) -> f64 {
    if min.is_none() && max.is_none() {
        return 1.0;
    }
    let Some(range) = candidate.compensation else {
        return UNDISCLOSED_SALARY_SCORE;
    };

    let wanted_low = f64::from(min.unwrap_or(0));
    let wanted_high = max.map_or(f64::INFINITY, f64::from);
    let (low, high) = (f64::from(range.min), f64::from(range.max));

    if high <= low {
        return if (wanted_low..=wanted_high).contains(&low) {
            1.0
        } else {
            0.0
        };
    }
    let overlap = (high.min(wanted_high) - low.max(wanted_low)).max(0.0);
    (overlap / (high - low)).clamp(0.0, 1.0)
}

fn organization_score(candidate: &JobCandidate, preferred: &[String]) -> f64 {
    let organization = candidate.organization.trim().to_lowercase();
    let mut preferred = preferred
        .iter()
        .map(|o| o.trim().to_lowercase())
        .filter(|o| !o.is_empty())
        .peekable();
    if preferred.peek().is_none() {
        return 1.0;
    }
    if preferred.any(|o| o == organization) {
        1.0
    } else {
        UNPREFERRED_ORGANIZATION_SCORE
    }
}
