//! Result types: non-fatal warnings and per-operation reports.
//!
//! Every successful operation returns the warnings it accumulated rather
//! than failing. A job with fifty slots and one unreachable data path is
//! still a useful deck; the warning tells the operator which slot to check.

use crate::error::ReportError;
use crate::slidespec::SlideSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A recorded, non-fatal problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A data path was missing or had the wrong shape; a default was used.
    Extraction {
        slide_key: String,
        token: String,
        path: String,
        detail: String,
    },
    /// A live or recorded tier did not resolve a slot; `source` is the tier
    /// that finally did.
    Generation {
        slide_key: String,
        detail: String,
        source: ContentSource,
    },
    /// A generated numeric claim disagrees with the extracted facts.
    Validation(ValidationWarning),
    /// The renderer could not place a value or blanked a stray marker.
    Render {
        slide_key: String,
        token: String,
        detail: String,
    },
}

impl Warning {
    pub fn slide_key(&self) -> &str {
        match self {
            Warning::Extraction { slide_key, .. }
            | Warning::Generation { slide_key, .. }
            | Warning::Render { slide_key, .. } => slide_key,
            Warning::Validation(v) => &v.slide_key,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Warning::Validation(_))
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Extraction {
                slide_key,
                token,
                path,
                detail,
            } => write!(f, "[extract] {slide_key}/{token} ({path}): {detail}"),
            Warning::Generation {
                slide_key,
                detail,
                source,
            } => write!(f, "[generate] {slide_key}: {detail} (resolved by {source})"),
            Warning::Validation(v) => write!(
                f,
                "[validate:{}] {}/{}: claimed {} but facts show {}",
                v.severity, v.slide_key, v.token, v.observed, v.expected
            ),
            Warning::Render {
                slide_key,
                token,
                detail,
            } => write!(f, "[render] {slide_key}/{token}: {detail}"),
        }
    }
}

/// A numeric claim that matched no grounding fact within tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub slide_key: String,
    pub token: String,
    /// The nearest grounding fact, as text.
    pub expected: String,
    /// The claim as it appeared in the generated text.
    pub observed: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// `Critical` at ≥ 50 % relative deviation from the nearest fact.
    pub fn from_deviation(relative: f64) -> Self {
        if relative >= 0.5 {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// Which degradation tier produced a slide's AI content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Live,
    Recorded,
    Deterministic,
}

impl fmt::Display for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentSource::Live => "live",
            ContentSource::Recorded => "recorded",
            ContentSource::Deterministic => "deterministic",
        })
    }
}

/// Result of a generate or rewrite operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub artifact_path: PathBuf,
    pub slidespec: SlideSpec,
    /// Every warning currently attached to the job.
    pub warnings: Vec<Warning>,
    /// Lowest tier that contributed to each slide with AI slots. Slides
    /// without AI slots are absent.
    pub sources: BTreeMap<String, ContentSource>,
    pub revision: u64,
}

impl JobReport {
    pub fn validation_warnings(&self) -> impl Iterator<Item = &ValidationWarning> {
        self.warnings.iter().filter_map(|w| match w {
            Warning::Validation(v) => Some(v),
            _ => None,
        })
    }
}

/// Atomic write: write to a sibling temp file, then rename over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    let fail = |source: std::io::Error| ReportError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)
}
