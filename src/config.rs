//! Configuration types for report generation.
//!
//! Every pipeline knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The three stages that talk to unreliable
//! collaborators each get their own nested section:
//!
//! * [`GenerationConfig`]: the LLM tier, batching and retry policy.
//! * [`ValidationConfig`]: fact-check tolerances.
//! * [`PreviewConfig`]: external converter paths and timeouts.
//!
//! # Design choice: builder over constructor
//! The config has two dozen fields and grows with every new collaborator.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::ReportError;
use crate::progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level configuration for a [`crate::service::ReportService`].
///
/// # Example
/// ```rust
/// use reportdeck::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .output_dir("outputs")
///     .enable_generation(false)
///     .max_batch_chars(8_000)
///     .build()
///     .unwrap();
/// assert!(!config.generation.enable_generation);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory receiving rendered artifacts, job records and the preview
    /// cache. Default: `outputs`.
    pub output_dir: PathBuf,

    pub generation: GenerationConfig,
    pub validation: ValidationConfig,
    pub preview: PreviewConfig,

    /// Receives batch events from the content generator. Default: no-op.
    pub progress_callback: ProgressCallback,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            generation: GenerationConfig::default(),
            validation: ValidationConfig::default(),
            preview: PreviewConfig::default(),
            progress_callback: Arc::new(NoopProgressCallback),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("output_dir", &self.output_dir)
            .field("generation", &self.generation)
            .field("validation", &self.validation)
            .field("preview", &self.preview)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// `<output_dir>/jobs`: one JSON record per job.
    pub fn jobs_dir(&self) -> PathBuf {
        self.output_dir.join("jobs")
    }

    /// `<output_dir>/reports`: rendered decks, one per job.
    pub fn reports_dir(&self) -> PathBuf {
        self.output_dir.join("reports")
    }

    /// `<output_dir>/logs/audit.jsonl`
    pub fn audit_log_path(&self) -> PathBuf {
        self.output_dir.join("logs").join("audit.jsonl")
    }

    /// `<output_dir>/previews`: preview cache root.
    pub fn preview_cache_dir(&self) -> PathBuf {
        self.output_dir.join("previews")
    }
}

// ── Generation ───────────────────────────────────────────────────────────

/// Live-tier settings for the content generator.
#[derive(Clone)]
pub struct GenerationConfig {
    /// Master switch for the live tier. Default: true.
    ///
    /// When false, AI slots resolve from recorded responses or deterministic
    /// synthesis only. No network traffic happens at all.
    pub enable_generation: bool,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Sampling temperature. Default: 0.3.
    ///
    /// Narrative slots benefit from some variety, but numbers must stay
    /// anchored to the supplied facts; higher values raise the validation
    /// warning rate noticeably.
    pub temperature: f32,

    /// Maximum tokens per batch response. Default: 2048.
    pub max_tokens: usize,

    /// Retries after the first attempt on a transient failure. Default: 3.
    pub max_retries: u32,

    /// Base backoff in milliseconds. Doubles per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound for the computed backoff in milliseconds. Default: 8000.
    ///
    /// A server-supplied retry-after hint is honoured even above this cap.
    pub max_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Ceiling on serialised per-batch context, in characters. Default: 12 000.
    ///
    /// Roughly 3 000 prompt tokens. Keeps each request comfortably inside
    /// small-context models while still packing several slides per call.
    pub max_batch_chars: usize,

    /// Batches in flight at once. Default: 1 (sequential).
    pub concurrency: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Directory of pre-recorded slidespecs. Default: None.
    pub recorded_dir: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enable_generation: true,
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.3,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            api_timeout_secs: 60,
            max_batch_chars: 12_000,
            concurrency: 1,
            system_prompt: None,
            recorded_dir: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("enable_generation", &self.enable_generation)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_batch_chars", &self.max_batch_chars)
            .field("concurrency", &self.concurrency)
            .field("recorded_dir", &self.recorded_dir)
            .finish()
    }
}

// ── Validation ───────────────────────────────────────────────────────────

/// Tolerances for matching a generated numeric claim to an extracted fact.
///
/// A claim `c` matches fact `f` when `|c - f| <= absolute_tolerance` or
/// `|c - f| <= relative_tolerance * |f|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Default: 0.5, so rounding "1234.4" to "1234" still matches.
    pub absolute_tolerance: f64,
    /// Default: 0.01 (1 %).
    pub relative_tolerance: f64,
    /// Claims with magnitude below this are not checked. Default: 0.0.
    pub ignore_below: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            absolute_tolerance: 0.5,
            relative_tolerance: 0.01,
            ignore_below: 0.0,
        }
    }
}

// ── Preview ──────────────────────────────────────────────────────────────

/// External converter settings for the preview chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Office converter binary. Default: `soffice`.
    pub soffice_path: PathBuf,

    /// Poppler rasteriser binary. Default: `pdftoppm`.
    pub pdftoppm_path: PathBuf,

    /// Explicit libpdfium path. If None, binds to the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Wall-clock budget per converter process in seconds. Default: 90.
    ///
    /// A cold LibreOffice start alone can take 10–20 s on a small container.
    pub converter_timeout_secs: u64,

    /// Attempts per converter before falling through. Default: 2.
    pub stage_attempts: u32,

    /// Raster DPI. Range: 48–300. Default: 110.
    pub dpi: u32,

    /// Cap on either rendered page dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            soffice_path: PathBuf::from("soffice"),
            pdftoppm_path: PathBuf::from("pdftoppm"),
            pdfium_library: None,
            converter_timeout_secs: 90,
            stage_attempts: 2,
            dpi: 110,
            max_rendered_pixels: 2000,
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn enable_generation(mut self, v: bool) -> Self {
        self.config.generation.enable_generation = v;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.generation.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.generation.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.generation.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.generation.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.generation.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.generation.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.generation.max_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.generation.api_timeout_secs = secs.max(1);
        self
    }

    pub fn max_batch_chars(mut self, n: usize) -> Self {
        self.config.generation.max_batch_chars = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.generation.concurrency = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.generation.system_prompt = Some(prompt.into());
        self
    }

    pub fn recorded_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.generation.recorded_dir = Some(dir.into());
        self
    }

    pub fn validation(mut self, v: ValidationConfig) -> Self {
        self.config.validation = v;
        self
    }

    pub fn absolute_tolerance(mut self, tol: f64) -> Self {
        self.config.validation.absolute_tolerance = tol;
        self
    }

    pub fn relative_tolerance(mut self, tol: f64) -> Self {
        self.config.validation.relative_tolerance = tol;
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.preview.soffice_path = path.into();
        self
    }

    pub fn pdftoppm_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.preview.pdftoppm_path = path.into();
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.preview.pdfium_library = Some(path.into());
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.preview.converter_timeout_secs = secs.max(1);
        self
    }

    pub fn stage_attempts(mut self, n: u32) -> Self {
        self.config.preview.stage_attempts = n.max(1);
        self
    }

    pub fn preview_dpi(mut self, dpi: u32) -> Self {
        self.config.preview.dpi = dpi.clamp(48, 300);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.preview.max_rendered_pixels = px.max(100);
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn GenerationProgressCallback>) -> Self {
        self.config.progress_callback = cb;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ReportError> {
        let c = &self.config;
        if c.generation.max_batch_chars < 256 {
            return Err(ReportError::InvalidConfig(format!(
                "max_batch_chars must be ≥ 256, got {}",
                c.generation.max_batch_chars
            )));
        }
        if c.generation.concurrency == 0 {
            return Err(ReportError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.generation.max_backoff_ms < c.generation.retry_backoff_ms {
            return Err(ReportError::InvalidConfig(format!(
                "max_backoff_ms ({}) is below retry_backoff_ms ({})",
                c.generation.max_backoff_ms, c.generation.retry_backoff_ms
            )));
        }
        let v = &c.validation;
        if !(v.absolute_tolerance >= 0.0 && v.relative_tolerance >= 0.0) {
            return Err(ReportError::InvalidConfig(
                "Validation tolerances must be non-negative".into(),
            ));
        }
        Ok(self.config)
    }
}
