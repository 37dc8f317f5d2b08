//! Error types for the reportdeck library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`ReportError`] (**Fatal**): the job cannot proceed at all (unknown
//!   template, corrupt PPTX, a declared token left unresolved, preview chain
//!   exhausted). Returned as `Err(ReportError)` from the service operations.
//!
//! * [`GenerationError`] (**Per batch**): one request to the generation
//!   service failed. Transient kinds are retried with backoff, the rest move
//!   the affected slots to the next content tier. Never escapes the
//!   generator; it only shows up as a [`crate::output::Warning`].
//!
//! * [`StageError`] (**Per converter attempt**): one preview converter
//!   failed. The chain advances to the next converter and only total
//!   exhaustion becomes [`ReportError::PreviewUnavailable`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the reportdeck library.
#[derive(Debug, Error)]
pub enum ReportError {
    // ── Catalog errors ────────────────────────────────────────────────────
    /// No descriptor is registered for this template id.
    #[error("Template '{template_id}' not found in catalog")]
    TemplateNotFound { template_id: String },

    /// No tenant input is registered for this input id.
    #[error("Input '{input_id}' not found in catalog")]
    InputNotFound { input_id: String },

    /// The descriptor was found but cannot be used.
    #[error("Template descriptor '{template_id}' is invalid: {detail}")]
    InvalidTemplate { template_id: String, detail: String },

    /// A catalog file exists but is not valid JSON for its type.
    #[error("Failed to parse '{path}': {detail}")]
    CatalogParse { path: PathBuf, detail: String },

    // ── Job errors ────────────────────────────────────────────────────────
    /// Job ids have the form `<input_id>:<template_id>`.
    #[error("Invalid job id '{job_id}': expected '<input_id>:<template_id>'")]
    InvalidJobId { job_id: String },

    /// Rewrite or preview requested for a job that was never generated.
    #[error("Job '{job_id}' not found.\nRun generate for this input/template pair first.")]
    JobNotFound { job_id: String },

    /// Rewrite targeted a slide key the template does not declare.
    #[error("Slide '{slide_key}' is not declared by template '{template_id}'")]
    UnknownSlide {
        template_id: String,
        slide_key: String,
    },

    /// A rewrite override named a token the slide does not declare.
    #[error("Token '{token}' is not declared on slide '{slide_key}'")]
    UnknownToken { slide_key: String, token: String },

    // ── Validation errors ─────────────────────────────────────────────────
    /// A declared token has no resolved value; rendering cannot proceed.
    #[error("Slide '{slide_key}' has no value for declared token '{token}'")]
    SchemaIncomplete { slide_key: String, token: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// The PPTX template cannot be read or is structurally broken.
    #[error("Template document '{path}' is corrupt: {detail}")]
    TemplateCorrupt { path: PathBuf, detail: String },

    /// Writing the rendered artifact failed.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Preview errors ────────────────────────────────────────────────────
    /// Every converter in the preview chain failed.
    #[error(
        "Preview unavailable for job '{job_id}'.\nAttempts:\n  {}\n\n\
Install LibreOffice (soffice) for PPTX → PDF, and pdfium or poppler-utils (pdftoppm) for page images.",
        .attempts.join("\n  ")
    )]
    PreviewUnavailable {
        job_id: String,
        attempts: Vec<String>,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed request to the generation service, classified for retry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// The call exceeded the per-request timeout.
    #[error("generation request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429. `retry_after` carries the server's wait hint when present.
    #[error("rate limited by provider{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx or a dropped connection.
    #[error("provider server error: {detail}")]
    Server { detail: String },

    /// The response arrived but carried no usable token map.
    #[error("unparseable response: {detail}")]
    Parse { detail: String },

    /// 401/403: retrying will not help.
    #[error("authentication rejected: {detail}")]
    Auth { detail: String },

    /// 400-class request problems: retrying will not help.
    #[error("malformed request: {detail}")]
    Malformed { detail: String },
}

impl GenerationError {
    /// Whether the retry loop should try the same batch again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Server { .. } | Self::Parse { .. }
        )
    }

    /// Server-provided wait hint, overriding the computed backoff.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// One failed converter attempt inside the preview chain.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// The converter binary or library could not be started or bound.
    #[error("{converter}: unavailable: {detail}")]
    Unavailable { converter: String, detail: String },

    /// The external process exceeded its wall-clock budget and was killed.
    #[error("{converter}: timed out after {secs}s")]
    TimedOut { converter: String, secs: u64 },

    /// The converter ran but failed or produced nothing.
    #[error("{converter}: {detail}")]
    Failed { converter: String, detail: String },
}
