//! hireloop configuration loaded from `hireloop.toml`.
//!
//! [`Config`] is split into the sections the operator edits from the console:
//! user agreement, job preferences, application budgets, scheduler pacing,
//! discovery and the actuator endpoint. Missing values use sensible defaults,
//! unknown keys are rejected at parse time, and [`Config::validate`] checks the
//! fields a run needs before `start()` accepts it.
//! The `HIRELOOP_ACTUATOR_TOKEN` environment variable takes precedence over the file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::actuator::ApplicantProfile;
use crate::error::{HireloopError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "hireloop.toml";
pub const TOKEN_ENV: &str = "HIRELOOP_ACTUATOR_TOKEN";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub user: UserSection,
    pub preferences: Preferences,
    pub application: ApplicationSettings,
    pub scheduler: SchedulerSettings,
    pub discovery: DiscoverySettings,
    pub actuator: ActuatorSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserSection {
    /// The operator accepted the source's terms for automated use.
    pub agreement_accepted: bool,
    pub agreement_timestamp: Option<DateTime<Utc>>,
}

/// Weighted matching criteria. A run scores against a frozen copy of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preferences {
    pub keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub locations: Vec<String>,
    pub salary_min: Option<u32>,
    pub salary_max: Option<u32>,
    pub preferred_organizations: Vec<String>,
    pub excluded_organizations: Vec<String>,
    /// Every entry must appear in the description or the posting is skipped.
    pub required_benefits: Vec<String>,
    pub min_description_length: usize,
    pub max_posting_age_days: Option<u32>,
    /// Eligible candidates scoring below this are skipped.
    pub min_match_score: f64,
    /// Weighted sums are divided by this before clamping to [0, 1].
    pub weight_total: f64,
    pub weights: MatchWeights,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            excluded_keywords: Vec::new(),
            locations: Vec::new(),
            salary_min: None,
            salary_max: None,
            preferred_organizations: Vec::new(),
            excluded_organizations: Vec::new(),
            required_benefits: Vec::new(),
            min_description_length: 100,
            max_posting_age_days: None,
            min_match_score: 0.0,
            weight_total: 1.0,
            weights: MatchWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchWeights {
    pub keyword: f64,
    pub location: f64,
    pub salary: f64,
    pub organization: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            keyword: 0.4,
            location: 0.2,
            salary: 0.3,
            organization: 0.1,
        }
    }
}

/// Budgets, retry caps, timeouts and the applicant profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationSettings {
    #[serde(default = "default_max_per_day")]
    pub max_applications_per_day: u32,

    #[serde(default = "default_max_per_session")]
    pub max_applications_per_session: u32,

    /// Re-queues allowed per candidate per run (rate limits and transient errors).
    #[serde(default = "default_max_retries")]
    pub max_retries_per_run: u32,

    /// Upper bound on a single actuator call.
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,

    #[serde(default)]
    pub resume_path: String,

    #[serde(default)]
    pub cover_letter_path: Option<String>,

    /// Fixed offset used to decide when the daily budget rolls over.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

// Default daily budget: 20 applications.
fn default_max_per_day() -> u32 {
    20
}

// Default session budget: same as the daily one.
fn default_max_per_session() -> u32 {
    20
}

// Default retries per candidate per run: 3.
fn default_max_retries() -> u32 {
    3
}

// Default actuator timeout: 300s.
fn default_apply_timeout_ms() -> u64 {
    300_000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            max_applications_per_day: default_max_per_day(),
            max_applications_per_session: default_max_per_session(),
            max_retries_per_run: default_max_retries(),
            apply_timeout_ms: default_apply_timeout_ms(),
            resume_path: String::new(),
            cover_letter_path: None,
            utc_offset_minutes: 0,
            data_dir: default_data_dir(),
        }
    }
}

/// Pacing: jitter window between actions plus cooldown escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Cooldown opened by the first rate-limit signal.
    #[serde(default = "default_initial_cooldown_ms")]
    pub initial_cooldown_ms: u64,

    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,

    /// Ceiling for both rate-limit cooldowns and transient backoff.
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,

    /// Base for exponential backoff after transient failures.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

// Default minimum pause between actions: 30s.
fn default_min_delay_ms() -> u64 {
    30_000
}

// Default maximum pause between actions: 90s.
fn default_max_delay_ms() -> u64 {
    90_000
}

// Default first cooldown after a rate limit: 180s.
fn default_initial_cooldown_ms() -> u64 {
    180_000
}

fn default_cooldown_multiplier() -> f64 {
    2.0
}

// Default cooldown ceiling: 30 minutes.
fn default_max_cooldown_ms() -> u64 {
    1_800_000
}

fn default_backoff_base_ms() -> u64 {
    5_000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            initial_cooldown_ms: default_initial_cooldown_ms(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_ms: default_max_cooldown_ms(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// How many result pages to pull and how hard to retry each one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    pub pages: u32,
    pub page_size: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            pages: 1,
            page_size: 25,
            max_retries: 3,
            backoff_base_ms: 2_000,
        }
    }
}

impl DiscoverySettings {
    /// Delay before retry `attempt` (1-based): base * 2^(attempt - 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActuatorSettings {
    /// Base URL of the automation service.
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

impl Config {
    /// Loads `hireloop.toml` from the current directory, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Loads the file at `path`, using defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;

        // The environment wins over the file for the actuator token.
        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.is_empty()
        {
            config.actuator.token = Some(token);
        }

        Ok(config)
    }

    /// Parses `path` as-is, without environment overrides.
    pub fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str::<Config>(&contents)?)
    }

    /// Writes the config atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Checks everything a run depends on, reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let prefs = &self.preferences;
        let app = &self.application;
        let sched = &self.scheduler;

        if !self.user.agreement_accepted {
            problems.push("user agreement not accepted".to_string());
        }
        if !prefs.keywords.iter().any(|k| !k.trim().is_empty()) {
            problems.push("at least one keyword is required".to_string());
        }
        if app.resume_path.trim().is_empty() {
            problems.push("application.resume_path is not set".to_string());
        } else if !Path::new(&app.resume_path).is_file() {
            problems.push(format!("resume not found at '{}'", app.resume_path));
        }
        if let (Some(min), Some(max)) = (prefs.salary_min, prefs.salary_max)
            && min > max
        {
            problems.push(format!("salary_min ({min}) exceeds salary_max ({max})"));
        }
        let weights = prefs.weights;
        if [weights.keyword, weights.location, weights.salary, weights.organization]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            problems.push("match weights must be non-negative".to_string());
        }
        if !(prefs.weight_total.is_finite() && prefs.weight_total > 0.0) {
            problems.push("weight_total must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&prefs.min_match_score) {
            problems.push("min_match_score must be within [0, 1]".to_string());
        }
        if app.max_applications_per_day == 0 || app.max_applications_per_session == 0 {
            problems.push("application budgets must be positive".to_string());
        }
        if app.max_applications_per_session > app.max_applications_per_day {
            problems.push(format!(
                "session budget ({}) exceeds daily budget ({})",
                app.max_applications_per_session, app.max_applications_per_day
            ));
        }
        if app.apply_timeout_ms == 0 {
            problems.push("apply_timeout_ms must be positive".to_string());
        }
        if app.utc_offset_minutes.abs() > 14 * 60 {
            problems.push("utc_offset_minutes must be within ±14h".to_string());
        }
        if sched.min_delay_ms > sched.max_delay_ms {
            problems.push(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                sched.min_delay_ms, sched.max_delay_ms
            ));
        }
        if !(sched.cooldown_multiplier.is_finite() && sched.cooldown_multiplier > 1.0) {
            problems.push("cooldown_multiplier must be greater than 1".to_string());
        }
        if sched.initial_cooldown_ms > sched.max_cooldown_ms {
            problems.push("initial_cooldown_ms exceeds max_cooldown_ms".to_string());
        }
        if self.discovery.pages == 0 {
            problems.push("discovery.pages must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HireloopError::Validation(problems))
        }
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.application.utc_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    /// Base URL of the automation service, required by anything that acts.
    pub fn actuator_endpoint(&self) -> Result<&str> {
        match self.actuator.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => Ok(endpoint),
            _ => Err(HireloopError::Config(
                "actuator.endpoint is not configured".to_string(),
            )),
        }
    }

    pub fn applicant_profile(&self) -> ApplicantProfile {
        ApplicantProfile {
            resume_path: PathBuf::from(&self.application.resume_path),
            cover_letter_path: self.application.cover_letter_path.as_ref().map(PathBuf::from),
        }
    }

    /// Copy safe to show on the console.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.actuator.token.is_some() {
            copy.actuator.token = Some("***".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runnable(dir: &TempDir) -> Config {
        let resume = dir.path().join("resume.pdf");
        fs::write(&resume, b"%PDF").unwrap();
        let mut config = Config::default();
        config.user.agreement_accepted = true;
        config.preferences.keywords = vec!["rust".into()];
        config.application.resume_path = resume.display().to_string();
        config
    }

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.application.max_applications_per_day, 20);
        assert_eq!(config.application.apply_timeout_ms, 300_000);
        assert_eq!(config.scheduler.initial_cooldown_ms, 180_000);
        assert_eq!(config.preferences.weights.keyword, 0.4);
        assert_eq!(config.preferences.min_description_length, 100);
        assert!(!config.user.agreement_accepted);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            [user]
            agreement_accepted = true

            [preferences]
            keywords = ["rust", "backend"]
            salary_min = 120000

            [application]
            max_applications_per_day = 5
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.user.agreement_accepted);
        assert_eq!(config.preferences.keywords, vec!["rust", "backend"]);
        assert_eq!(config.preferences.salary_min, Some(120_000));
        assert_eq!(config.application.max_applications_per_day, 5);
        assert_eq!(config.application.max_applications_per_session, 20);
        assert_eq!(config.scheduler.max_delay_ms, 90_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let toml_str = r#"
            [application]
            max_aplications_per_day = 5
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn load_falls_back_to_defaults_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.application.max_retries_per_run, 3);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hireloop.toml");
        let mut config = runnable(&dir);
        config.preferences.max_posting_age_days = Some(7);
        config.save(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.preferences, config.preferences);
        assert_eq!(loaded.application, config.application);
    }

    #[test]
    fn runnable_config_validates() {
        let dir = TempDir::new().unwrap();
        runnable(&dir).validate().unwrap();
    }

    #[test]
    fn validation_reports_every_missing_requirement() {
        let err = Config::default().validate().unwrap_err();
        let HireloopError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert!(problems.iter().any(|p| p.contains("agreement")));
        assert!(problems.iter().any(|p| p.contains("keyword")));
        assert!(problems.iter().any(|p| p.contains("resume_path")));
    }

    #[test]
    fn validation_rejects_missing_resume_file() {
        let dir = TempDir::new().unwrap();
        let mut config = runnable(&dir);
        config.application.resume_path = dir.path().join("gone.pdf").display().to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("resume not found"));
    }

    #[test]
    fn validation_rejects_inverted_bounds() {
        let dir = TempDir::new().unwrap();
        let mut config = runnable(&dir);
        config.scheduler.min_delay_ms = 10;
        config.scheduler.max_delay_ms = 5;
        config.preferences.salary_min = Some(200);
        config.preferences.salary_max = Some(100);
        config.scheduler.cooldown_multiplier = 1.0;
        let HireloopError::Validation(problems) = config.validate().unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn discovery_backoff_doubles() {
        let discovery = DiscoverySettings {
            backoff_base_ms: 1000,
            ..Default::default()
        };
        assert_eq!(discovery.delay_for_attempt(1), 1000);
        assert_eq!(discovery.delay_for_attempt(2), 2000);
        assert_eq!(discovery.delay_for_attempt(3), 4000);
    }

    #[test]
    fn redacted_hides_token() {
        let mut config = Config::default();
        config.actuator.token = Some("secret".into());
        assert_eq!(config.redacted().actuator.token.as_deref(), Some("***"));
        assert!(Config::default().redacted().actuator.token.is_none());
    }

    #[test]
    fn actuator_endpoint_is_required() {
        let mut config = Config::default();
        assert!(matches!(
            config.actuator_endpoint(),
            Err(HireloopError::Config(msg)) if msg.contains("endpoint")
        ));
        config.actuator.endpoint = Some("  ".into());
        assert!(config.actuator_endpoint().is_err());
        config.actuator.endpoint = Some("http://127.0.0.1:8787".into());
        assert_eq!(config.actuator_endpoint().unwrap(), "http://127.0.0.1:8787");
    }

    #[test]
    fn utc_offset_uses_minutes() {
        let mut config = Config::default();
        config.application.utc_offset_minutes = 600;
        assert_eq!(config.utc_offset().local_minus_utc(), 36_000);
    }
}
