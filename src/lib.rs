//! # reportdeck
//!
//! Fill PPTX report templates from tenant security telemetry.
//!
//! ## Why this crate?
//!
//! A security report deck mixes two kinds of content: numbers that must be
//! exactly right (alert counts, patch compliance, incident tables) and prose
//! that reads well (executive summaries, recommendations). This crate keeps
//! them apart. Numbers are extracted deterministically from the tenant's
//! JSON; prose comes from an LLM that is handed those numbers as grounding,
//! and every figure the LLM writes is checked against them afterwards.
//!
//! The LLM is treated as unreliable. Requests are batched and retried, and
//! when the live service is down the deck is still produced from a recorded
//! response or, failing that, from plain sentences built out of the facts.
//!
//! ## Pipeline Overview
//!
//! ```text
//! template + tenant input
//!  │
//!  ├─ 1. Extract   dotted-path lookups → text, list, chart and table values
//!  ├─ 2. Generate  batched LLM calls → recorded response → deterministic text
//!  ├─ 3. Validate  completeness (fatal) + numeric fact-check (warnings)
//!  ├─ 4. Render    fill {{TOKEN}} markers, add native charts and tables
//!  └─ 5. Preview   soffice → pdfium | pdftoppm → PNG pages (cached)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reportdeck::{DirectoryCatalog, JsonlAuditSink, PipelineConfig, ReportService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .output_dir("outputs")
//!         .recorded_dir("data/recorded")
//!         .build()?;
//!     let audit = Arc::new(JsonlAuditSink::new(config.audit_log_path()));
//!     let catalog = Arc::new(DirectoryCatalog::new("data/templates", "data/inputs"));
//!     let service = ReportService::new(config, catalog, audit);
//!
//!     let report = service.generate("acme", "executive_summary").await?;
//!     println!("{} (revision {})", report.artifact_path.display(), report.revision);
//!     for w in &report.warnings {
//!         eprintln!("{w}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `reportdeck` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! reportdeck = { version = "0.3", default-features = false }
//! ```
//!
//! ## External tools
//!
//! Previews need LibreOffice (`soffice`) on the `PATH` and either a pdfium
//! shared library or poppler's `pdftoppm`. Generation and rendering need
//! neither.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod input;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod slidespec;
pub mod template;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use audit::{AuditEvent, AuditSink, JsonlAuditSink, MemoryAuditSink, TracingAuditSink};
pub use catalog::{CatalogStore, DirectoryCatalog, MemoryCatalog};
pub use config::{GenerationConfig, PipelineConfig, PipelineConfigBuilder, PreviewConfig, ValidationConfig};
pub use error::{GenerationError, ReportError, StageError};
pub use input::{Lookup, TenantInput};
pub use job::{Job, JobKey, JobStore};
pub use output::{ContentSource, JobReport, Severity, ValidationWarning, Warning};
pub use pipeline::generate::{ContentGenerator, GenerationScope};
pub use pipeline::llm::{GenerationBackend, GenerationRequest};
pub use preview::{PreviewArtifact, PreviewOutcome, PreviewPipeline};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::{ReportService, RewriteRequest};
pub use slidespec::{SlideContent, SlideSpec};
pub use template::TemplateDescriptor;
