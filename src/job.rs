//! Jobs and the per-job serialised store.
//!
//! A job is identified by `(input_id, template_id)` and owns exactly one
//! current slidespec. Every operation on a job (generate, rewrite, preview)
//! holds that job's async mutex from load to persist, so two rewrites of the
//! same job can never interleave and lose an update. Tokio's mutex is FIFO:
//! the caller that queued last writes last, and its result wins.
//!
//! Jobs are persisted as `<root>/<sanitised job id>-<digest>.json` and loaded lazily
//! on first access, so they survive a restart.

use crate::error::ReportError;
use crate::output::{write_atomic, ContentSource, JobReport, Warning};
use crate::slidespec::SlideSpec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// `(input_id, template_id)`, rendered as `"<input_id>:<template_id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub input_id: String,
    pub template_id: String,
}

impl JobKey {
    pub fn new(input_id: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            input_id: input_id.into(),
            template_id: template_id.into(),
        }
    }

    /// Parse `"<input_id>:<template_id>"`. The split is on the first colon.
    pub fn parse(job_id: &str) -> Result<Self, ReportError> {
        match job_id.split_once(':') {
            Some((input, template)) if !input.is_empty() && !template.is_empty() => {
                Ok(Self::new(input, template))
            }
            _ => Err(ReportError::InvalidJobId {
                job_id: job_id.to_string(),
            }),
        }
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.input_id, self.template_id)
    }

    /// File-name stem for this job: the sanitised id plus a short digest of
    /// the raw id, so ids that sanitise alike (`a_b:c`, `a:b_c`) stay apart.
    pub fn sanitized(&self) -> String {
        let id = self.id();
        let digest = hex::encode(Sha256::digest(id.as_bytes()));
        format!("{}-{}", sanitize_job_id(&id), &digest[..12])
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.input_id, self.template_id)
    }
}

/// Replace `: * ? " < > | / \` with `_`.
pub fn sanitize_job_id(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Persistent state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    pub slidespec: SlideSpec,
    pub artifact_path: PathBuf,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub sources: BTreeMap<String, ContentSource>,
    /// 1 after generate, +1 per rewrite.
    pub revision: u64,
}

impl Job {
    /// Snapshot returned to callers.
    pub fn report(&self) -> JobReport {
        JobReport {
            job_id: self.key.id(),
            artifact_path: self.artifact_path.clone(),
            slidespec: self.slidespec.clone(),
            warnings: self.warnings.clone(),
            sources: self.sources.clone(),
            revision: self.revision,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    loaded: bool,
    job: Option<Job>,
}

/// Job records keyed by [`JobKey`], one async mutex per key.
pub struct JobStore {
    root: PathBuf,
    slots: Mutex<HashMap<JobKey, Arc<AsyncMutex<Slot>>>>,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, key: &JobKey) -> PathBuf {
        self.root.join(format!("{}.json", key.sanitized()))
    }

    /// Acquire the job's lock, loading its record from disk on first use.
    pub async fn lock(&self, key: &JobKey) -> Result<JobGuard<'_>, ReportError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let mut guard = slot.lock_owned().await;
        if !guard.loaded {
            guard.job = self.load(key).await?;
            guard.loaded = true;
        }
        Ok(JobGuard {
            store: self,
            key: key.clone(),
            guard,
        })
    }

    async fn load(&self, key: &JobKey) -> Result<Option<Job>, ReportError> {
        let path = self.record_path(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ReportError::Internal(format!(
                    "reading job record {}: {e}",
                    path.display()
                )))
            }
        };
        let job: Job = serde_json::from_str(&text).map_err(|e| ReportError::CatalogParse {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        debug!("Loaded job {} (revision {}) from {}", key, job.revision, path.display());
        Ok(Some(job))
    }
}

/// Exclusive access to one job for the duration of an operation.
pub struct JobGuard<'s> {
    store: &'s JobStore,
    key: JobKey,
    guard: OwnedMutexGuard<Slot>,
}

impl JobGuard<'_> {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn job(&self) -> Option<&Job> {
        self.guard.job.as_ref()
    }

    /// The current job, or [`ReportError::JobNotFound`].
    pub fn require(&self) -> Result<&Job, ReportError> {
        self.job().ok_or_else(|| ReportError::JobNotFound {
            job_id: self.key.id(),
        })
    }

    /// Persist `job` atomically and make it the current state.
    pub async fn save(&mut self, job: Job) -> Result<(), ReportError> {
        let path = self.store.record_path(&self.key);
        let bytes = serde_json::to_vec_pretty(&job)
            .map_err(|e| ReportError::Internal(format!("serialising job {}: {e}", self.key)))?;
        write_atomic(&path, &bytes).await?;
        self.guard.job = Some(job);
        Ok(())
    }
}

impl Drop for JobGuard<'_> {
    /// Forget the slot when nobody else holds or waits on it; the record on
    /// disk is the state of record and is reloaded on next use.
    fn drop(&mut self) {
        let mut slots = self.store.slots.lock().unwrap_or_else(|e| e.into_inner());
        let ours = OwnedMutexGuard::mutex(&self.guard);
        let idle = slots
            .get(&self.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, ours) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(&self.key);
        }
    }
}
