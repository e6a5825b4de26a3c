//! Durable JSON-file repositories for candidates, application records and
//! audit/log entries.
//!
//! Every repository keeps its last committed snapshot in memory behind a
//! `RwLock` and serializes writers through a `Mutex`. A write produces the new
//! snapshot, writes it to a sibling temp file, renames that over the target,
//! and only then publishes the snapshot to readers. A reader therefore never
//! observes a half-written file or a snapshot that is not on disk.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::StorageError;
use crate::state_machine::{
    ApplicationRecord, AttemptOutcome, CandidateOutcome, JobCandidate, LogEntry,
};

const CANDIDATES_FILE: &str = "candidates.json";
const APPLICATIONS_FILE: &str = "applications.json";
const LOGS_FILE: &str = "logs.json";
const BACKUP_DIR: &str = "backups";

/// Repository selector for operator-triggered purges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Candidates,
    Applications,
    Logs,
    All,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Candidates => write!(f, "candidates"),
            DataKind::Applications => write!(f, "applications"),
            DataKind::Logs => write!(f, "logs"),
            DataKind::All => write!(f, "all"),
        }
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "candidates" | "jobs" => Ok(DataKind::Candidates),
            "applications" | "applied" => Ok(DataKind::Applications),
            "logs" => Ok(DataKind::Logs),
            "all" => Ok(DataKind::All),
            other => Err(format!("unknown data kind '{other}'")),
        }
    }
}

/// Aggregate view used by `status` and the console header.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub candidates: usize,
    pub pending: usize,
    pub applications: usize,
    pub applied_total: usize,
    pub applied_today: u32,
    pub failed_total: usize,
    pub unique_organizations: usize,
    pub last_application: Option<DateTime<Utc>>,
}

/// Size of one repository, as reported by [`PersistentStore::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub file: &'static str,
    pub records: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub data_dir: PathBuf,
    pub repositories: Vec<RepositoryInfo>,
    pub backups: usize,
}

/// One self-contained snapshot of every repository plus the configuration.
#[derive(Serialize)]
struct BackupRef<'a> {
    backup_timestamp: DateTime<Utc>,
    config: Option<Config>,
    candidates: &'a [JobCandidate],
    applications: &'a [ApplicationRecord],
    logs: &'a [LogEntry],
}

#[derive(Serialize)]
struct RepositoryFileRef<'a, T> {
    records: &'a [T],
    total_count: usize,
    last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RepositoryFile<T> {
    records: Vec<T>,
}

// Older files were written as a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk<T> {
    Wrapped(RepositoryFile<T>),
    Bare(Vec<T>),
}

struct Repository<T> {
    path: PathBuf,
    committed: RwLock<Arc<Vec<T>>>,
    writer: Mutex<()>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq,
{
    fn open(path: PathBuf) -> Result<Self, StorageError> {
        let records = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StorageError::ReadFile {
                path: path.clone(),
                source,
            })?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                match serde_json::from_str::<OnDisk<T>>(&raw) {
                    Ok(OnDisk::Wrapped(file)) => file.records,
                    Ok(OnDisk::Bare(records)) => records,
                    Err(source) => {
                        return Err(StorageError::Parse {
                            path: path.clone(),
                            source,
                        });
                    }
                }
            }
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = records.len(), "repository opened");

        Ok(Self {
            path,
            committed: RwLock::new(Arc::new(records)),
            writer: Mutex::new(()),
        })
    }

    fn snapshot(&self) -> Arc<Vec<T>> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `f` to a copy of the committed records and commits the result.
    /// Nothing is written when `f` fails or leaves the records unchanged.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Vec<T>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let mut next = current.as_ref().clone();
        let value = f(&mut next)?;
        if next != *current {
            off_worker(|| write_atomic(&self.path, &next))?;
            *self.committed.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        }
        Ok(value)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        off_worker(|| write_atomic::<T>(&self.path, &[]))?;
        *self.committed.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
        Ok(())
    }
}

/// Runs blocking file I/O. On a multi-threaded runtime the worker's other
/// tasks move to a peer first; anywhere else `f` runs inline.
fn off_worker<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn write_atomic<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StorageError> {
    let file = RepositoryFileRef {
        records,
        total_count: records.len(),
        last_updated: Utc::now(),
    };
    write_json_atomic(path, &file)
}

fn write_json_atomic(path: &Path, value: &impl Serialize) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|source| StorageError::WriteFile {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StorageError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

/// The three persisted repositories under one data directory.
pub struct PersistentStore {
    dir: PathBuf,
    candidates: Repository<JobCandidate>,
    applications: Repository<ApplicationRecord>,
    logs: Repository<LogEntry>,
}

impl PersistentStore {
    /// Opens (creating if needed) the repositories under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StorageError::WriteFile {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            candidates: Repository::open(dir.join(CANDIDATES_FILE))?,
            applications: Repository::open(dir.join(APPLICATIONS_FILE))?,
            logs: Repository::open(dir.join(LOGS_FILE))?,
            dir,
        })
    }

    // ─── Candidates ─────────────────────────────────────────────────────────

    pub fn candidates(&self) -> Vec<JobCandidate> {
        self.candidates.snapshot().as_ref().clone()
    }

    pub fn candidate(&self, id: &str) -> Option<JobCandidate> {
        self.candidates.snapshot().iter().find(|c| c.id == id).cloned()
    }

    pub fn applied_ids(&self) -> HashSet<String> {
        self.candidates
            .snapshot()
            .iter()
            .filter(|c| c.is_applied())
            .map(|c| c.id.clone())
            .collect()
    }

    /// Inserts candidates not seen before. Already persisted candidates keep
    /// their original fields. Returns how many were inserted.
    pub fn upsert_candidates(&self, incoming: &[JobCandidate]) -> Result<usize, StorageError> {
        self.candidates.mutate(|records| {
            let mut known: HashSet<String> = records.iter().map(|c| c.id.clone()).collect();
            let mut inserted = 0;
            for candidate in incoming {
                if known.insert(candidate.id.clone()) {
                    records.push(candidate.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    /// Records the score computed in `run_id`. Re-scoring with a different value
    /// inside the same run is rejected.
    pub fn set_score(&self, id: &str, run_id: Uuid, score: f64) -> Result<(), StorageError> {
        self.candidates.mutate(|records| {
            let candidate = find_mut(records, id)?;
            if candidate.scored_in_run == Some(run_id)
                && let Some(current) = candidate.match_score
            {
                if current != score {
                    return Err(StorageError::ScoreConflict {
                        candidate_id: id.to_string(),
                        current,
                    });
                }
                return Ok(());
            }
            candidate.match_score = Some(score);
            candidate.scored_in_run = Some(run_id);
            Ok(())
        })
    }

    /// Records a terminal outcome.
    ///
    /// `Applied` is final forever. Any other terminal outcome is final for the
    /// run (or manual submission) that wrote it, and may be replaced by a later
    /// one. Writing the value already stored is a no-op.
    pub fn set_outcome(
        &self,
        id: &str,
        run_id: Uuid,
        outcome: CandidateOutcome,
        reason: Option<String>,
    ) -> Result<(), StorageError> {
        self.candidates.mutate(|records| {
            let candidate = find_mut(records, id)?;
            let current = candidate.outcome;
            if current == outcome {
                return Ok(());
            }
            let same_run = candidate.outcome_run_id == Some(run_id);
            let conflict = current == CandidateOutcome::Applied
                || outcome == CandidateOutcome::Pending
                || (current.is_terminal() && same_run);
            if conflict {
                return Err(StorageError::OutcomeConflict {
                    candidate_id: id.to_string(),
                    current,
                    attempted: outcome,
                });
            }
            candidate.outcome = outcome;
            candidate.outcome_run_id = Some(run_id);
            candidate.skip_reason = match outcome {
                CandidateOutcome::Skipped => reason,
                _ => None,
            };
            Ok(())
        })
    }

    // ─── Applications ───────────────────────────────────────────────────────

    pub fn applications(&self) -> Vec<ApplicationRecord> {
        self.applications.snapshot().as_ref().clone()
    }

    pub fn append_application(&self, record: ApplicationRecord) -> Result<(), StorageError> {
        self.applications.mutate(|records| {
            records.push(record);
            Ok(())
        })
    }

    /// Succeeded attempts whose submission falls on `day` in `offset`.
    pub fn applied_on(&self, day: NaiveDate, offset: FixedOffset) -> u32 {
        self.applications
            .snapshot()
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Succeeded)
            .filter(|r| r.submitted_at.with_timezone(&offset).date_naive() == day)
            .count() as u32
    }

    // ─── Logs ───────────────────────────────────────────────────────────────

    /// The newest `limit` entries in chronological order, or all of them.
    pub fn logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let logs = self.logs.snapshot();
        let skip = limit.map_or(0, |n| logs.len().saturating_sub(n));
        logs[skip..].to_vec()
    }

    pub fn append_log(&self, entry: LogEntry) -> Result<(), StorageError> {
        self.logs.mutate(|records| {
            records.push(entry);
            Ok(())
        })
    }

    // ─── Maintenance ────────────────────────────────────────────────────────

    pub fn clear(&self, kind: DataKind) -> Result<(), StorageError> {
        match kind {
            DataKind::Candidates => self.candidates.clear()?,
            DataKind::Applications => self.applications.clear()?,
            DataKind::Logs => self.logs.clear()?,
            DataKind::All => {
                self.candidates.clear()?;
                self.applications.clear()?;
                self.logs.clear()?;
            }
        }
        info!(kind = %kind, "repository cleared");
        Ok(())
    }

    /// Writes every repository and the (redacted) configuration into one
    /// timestamped file under `backups/`. Returns the file written.
    pub fn backup(
        &self,
        config: Option<&Config>,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.dir.join(BACKUP_DIR);
        fs::create_dir_all(&dir).map_err(|source| StorageError::WriteFile {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("backup_{}.json", now.format("%Y%m%d_%H%M%S_%3f")));

        let candidates = self.candidates.snapshot();
        let applications = self.applications.snapshot();
        let logs = self.logs.snapshot();
        let backup = BackupRef {
            backup_timestamp: now,
            config: config.map(Config::redacted),
            candidates: &candidates,
            applications: &applications,
            logs: &logs,
        };
        off_worker(|| write_json_atomic(&path, &backup))?;
        info!(path = %path.display(), "backup written");
        Ok(path)
    }

    /// Record counts and on-disk sizes of each repository.
    pub fn info(&self) -> StorageInfo {
        let size = |file: &str| fs::metadata(self.dir.join(file)).map_or(0, |m| m.len());
        let backups = fs::read_dir(self.dir.join(BACKUP_DIR)).map_or(0, |entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("backup_") && name.ends_with(".json")
                })
                .count()
        });

        StorageInfo {
            data_dir: self.dir.clone(),
            repositories: vec![
                RepositoryInfo {
                    file: CANDIDATES_FILE,
                    records: self.candidates.snapshot().len(),
                    bytes: size(CANDIDATES_FILE),
                },
                RepositoryInfo {
                    file: APPLICATIONS_FILE,
                    records: self.applications.snapshot().len(),
                    bytes: size(APPLICATIONS_FILE),
                },
                RepositoryInfo {
                    file: LOGS_FILE,
                    records: self.logs.snapshot().len(),
                    bytes: size(LOGS_FILE),
                },
            ],
            backups,
        }
    }

    pub fn stats(&self, now: DateTime<Utc>, offset: FixedOffset) -> StoreStats {
        let candidates = self.candidates.snapshot();
        let applications = self.applications.snapshot();
        let today = now.with_timezone(&offset).date_naive();

        let organizations: HashSet<String> = candidates
            .iter()
            .filter(|c| c.is_applied())
            .map(|c| c.organization.to_lowercase())
            .collect();

        StoreStats {
            candidates: candidates.len(),
            pending: candidates
                .iter()
                .filter(|c| c.outcome == CandidateOutcome::Pending)
                .count(),
            applications: applications.len(),
            applied_total: applications
                .iter()
                .filter(|r| r.outcome == AttemptOutcome::Succeeded)
                .count(),
            applied_today: self.applied_on(today, offset),
            failed_total: applications
                .iter()
                .filter(|r| r.outcome == AttemptOutcome::Failed)
                .count(),
            unique_organizations: organizations.len(),
            last_application: applications.iter().map(|r| r.submitted_at).max(),
        }
    }
}

fn find_mut<'a>(
    records: &'a mut [JobCandidate],
    id: &str,
) -> Result<&'a mut JobCandidate, StorageError> {
    records
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| StorageError::CandidateNotFound(id.to_string()))
}
