//! Job-level operations: generate, rewrite, preview.
//!
//! [`ReportService`] wires the pipeline stages to a catalog, a job store and
//! an audit sink. Every operation holds the job's lock from load to persist,
//! so two requests for the same job never interleave while distinct jobs
//! run independently.
//!
//! ```text
//! generate:  catalog ─▶ extract ─▶ generate(all) ─▶ validate ─▶ render ─▶ save
//! rewrite:   job ─▶ extract ─▶ generate(slide) ─▶ overrides ─▶ validate(slide) ─▶ render ─▶ save
//! preview:   job ─▶ (re-render if the deck is gone) ─▶ convert ─▶ rasterize
//! ```

use crate::audit::{AuditEvent, AuditSink};
use crate::catalog::CatalogStore;
use crate::config::PipelineConfig;
use crate::error::ReportError;
use crate::job::{Job, JobKey, JobStore};
use crate::output::{ContentSource, JobReport, Severity, ValidationWarning, Warning};
use crate::pipeline::extract::extract_facts;
use crate::pipeline::generate::{ContentGenerator, GenerationOutcome, GenerationScope};
use crate::pipeline::parse::coerce;
use crate::pipeline::render::render_deck;
use crate::pipeline::validate::{check_completeness, fact_check};
use crate::preview::{PreviewOutcome, PreviewPipeline};
use crate::slidespec::SlideContent;
use crate::template::TemplateDescriptor;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A single-slide rewrite.
#[derive(Debug, Clone, Default)]
pub struct RewriteRequest {
    pub slide_key: String,
    /// Extra guidance appended to the slide's AI instructions.
    pub instruction: Option<String>,
    /// Token values applied after generation, overriding whatever it
    /// produced.
    pub overrides: Map<String, Value>,
}

impl RewriteRequest {
    pub fn new(slide_key: impl Into<String>) -> Self {
        Self {
            slide_key: slide_key.into(),
            ..Self::default()
        }
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn set(mut self, token: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(token.into(), value);
        self
    }
}

pub struct ReportService {
    config: PipelineConfig,
    catalog: Arc<dyn CatalogStore>,
    generator: ContentGenerator,
    store: JobStore,
    preview: PreviewPipeline,
    audit: Arc<dyn AuditSink>,
}

impl ReportService {
    /// Build a service with the live backend and preview chain resolved
    /// from `config`.
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<dyn CatalogStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let generator =
            ContentGenerator::new(&config.generation, Arc::clone(&config.progress_callback));
        let preview = PreviewPipeline::from_config(&config);
        let store = JobStore::new(config.jobs_dir());
        Self {
            config,
            catalog,
            generator,
            store,
            preview,
            audit,
        }
    }

    /// Replace the content generator.
    pub fn with_generator(mut self, generator: ContentGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Replace the preview chain.
    pub fn with_preview(mut self, preview: PreviewPipeline) -> Self {
        self.preview = preview;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Where the deck of `key` is written.
    pub fn report_path(&self, key: &JobKey) -> PathBuf {
        self.config
            .reports_dir()
            .join(format!("{}.pptx", key.sanitized()))
    }

    /// Generate (or regenerate) the deck for an input/template pair.
    ///
    /// Regenerating an existing job replaces its slidespec and bumps its
    /// revision; the job id stays the same.
    ///
    /// # Errors
    /// Catalog lookups, an incomplete slidespec, a corrupt template
    /// document or a failed write. Extraction, generation and validation
    /// problems are warnings on the returned report.
    pub async fn generate(&self, input_id: &str, template_id: &str) -> Result<JobReport, ReportError> {
        let start = Instant::now();
        let key = JobKey::new(input_id, template_id);
        let mut guard = self.store.lock(&key).await?;
        info!("Generating {}", key);

        let template = self.catalog.load_template(template_id).await?;
        let input = self.catalog.load_input(input_id).await?;
        let document = self.catalog.template_document(template_id).await?;

        let facts = extract_facts(&input, &template);
        let outcome = self
            .generator
            .generate(&key, &template, &facts, &GenerationScope::All)
            .await?;
        let spec = outcome.slidespec(&template.template_id);
        let GenerationOutcome {
            sources,
            warnings: generation_warnings,
            ..
        } = outcome;

        check_completeness(&template, &spec)?;
        let validation = fact_check(&template, &facts, &spec, &self.config.validation, None);

        let output = self.report_path(&key);
        let rendered = render_deck(&document, &template, &spec, &output).await?;

        let mut warnings = facts.warnings.clone();
        warnings.extend(generation_warnings);
        warnings.extend(validation.iter().cloned().map(Warning::Validation));
        warnings.extend(rendered.warnings);

        let revision = guard.job().map_or(1, |j| j.revision + 1);
        let job = Job {
            key: key.clone(),
            slidespec: spec,
            artifact_path: output,
            warnings,
            sources,
            revision,
        };
        guard.save(job.clone()).await?;

        self.audit_validation(&key, &validation);
        self.audit_fallbacks(&key, &job.sources);
        self.audit.record(AuditEvent::new("generate", key.id()).details(json!({
            "artifact": job.artifact_path,
            "revision": revision,
            "warnings": job.warnings.len(),
            "live_backend": self.generator.backend_name(),
        })));
        info!(
            "Generated {} revision {} in {}ms ({} warning(s))",
            key,
            revision,
            start.elapsed().as_millis(),
            job.warnings.len()
        );
        Ok(job.report())
    }

    /// Regenerate one slide of an existing job.
    ///
    /// Other slides keep their values untouched. Overrides are coerced to
    /// the slot kind and applied after generation.
    pub async fn rewrite(&self, job_id: &str, request: RewriteRequest) -> Result<JobReport, ReportError> {
        let key = JobKey::parse(job_id)?;
        let mut guard = self.store.lock(&key).await?;
        let current = guard.require()?.clone();
        let slide_key = request.slide_key.as_str();
        info!("Rewriting {} slide '{}'", key, slide_key);

        let template = self.catalog.load_template(&key.template_id).await?;
        let input = self.catalog.load_input(&key.input_id).await?;
        let document = self.catalog.template_document(&key.template_id).await?;

        let facts = extract_facts(&input, &template);
        let scope = GenerationScope::Slide {
            slide_key: slide_key.to_string(),
            instruction: request.instruction.clone(),
        };
        let outcome = self
            .generator
            .generate(&key, &template, &facts, &scope)
            .await?;
        let Some(mut content) = outcome.slides.into_iter().next() else {
            return Err(ReportError::Internal(format!(
                "generation returned no content for slide '{slide_key}'"
            )));
        };
        apply_overrides(&template, &mut content, &request.overrides)?;

        let mut spec = current.slidespec.clone();
        spec.upsert(content);
        check_completeness(&template, &spec)?;
        let validation = fact_check(
            &template,
            &facts,
            &spec,
            &self.config.validation,
            Some(slide_key),
        );

        let output = self.report_path(&key);
        let rendered = render_deck(&document, &template, &spec, &output).await?;

        // Render warnings are recomputed for the whole deck on every render.
        let mut warnings: Vec<Warning> = current
            .warnings
            .into_iter()
            .filter(|w| w.slide_key() != slide_key && !matches!(w, Warning::Render { .. }))
            .collect();
        warnings.extend(
            facts
                .warnings
                .iter()
                .filter(|w| w.slide_key() == slide_key)
                .cloned(),
        );
        warnings.extend(outcome.warnings);
        warnings.extend(validation.iter().cloned().map(Warning::Validation));
        warnings.extend(rendered.warnings);

        let mut sources = current.sources;
        sources.remove(slide_key);
        sources.extend(outcome.sources);

        let revision = current.revision + 1;
        let job = Job {
            key: key.clone(),
            slidespec: spec,
            artifact_path: output,
            warnings,
            sources,
            revision,
        };
        guard.save(job.clone()).await?;

        self.audit_validation(&key, &validation);
        let slide_sources: BTreeMap<String, ContentSource> = job
            .sources
            .iter()
            .filter(|(k, _)| k.as_str() == slide_key)
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        self.audit_fallbacks(&key, &slide_sources);
        self.audit.record(
            AuditEvent::new("rewrite", key.id())
                .slide(slide_key)
                .details(json!({
                    "fields": request.overrides.keys().collect::<Vec<_>>(),
                    "instruction": request.instruction,
                    "revision": revision,
                })),
        );
        info!("Rewrote {} slide '{}' (revision {})", key, slide_key, revision);
        Ok(job.report())
    }

    /// Page images for a job's current deck.
    ///
    /// A deck missing from disk is re-rendered from the stored slidespec
    /// first.
    pub async fn preview(&self, job_id: &str) -> Result<PreviewOutcome, ReportError> {
        let key = JobKey::parse(job_id)?;
        let guard = self.store.lock(&key).await?;
        let job = guard.require()?;

        if !tokio::fs::try_exists(&job.artifact_path).await.unwrap_or(false) {
            warn!(
                "Deck {} is missing; re-rendering from the stored slidespec",
                job.artifact_path.display()
            );
            let template = self.catalog.load_template(&key.template_id).await?;
            let document = self.catalog.template_document(&key.template_id).await?;
            render_deck(&document, &template, &job.slidespec, &job.artifact_path).await?;
        }

        match self.preview.preview(&key, &job.artifact_path).await {
            Ok(outcome) => {
                self.audit.record(AuditEvent::new("preview", key.id()).details(json!({
                    "artifact": outcome.artifact,
                    "sha256": outcome.artifact_sha256,
                    "cached": outcome.cached,
                    "failures": outcome.failures,
                })));
                Ok(outcome)
            }
            Err(e) => {
                self.audit.record(
                    AuditEvent::new("preview", key.id())
                        .severity("error")
                        .details(json!({ "error": e.to_string() })),
                );
                Err(e)
            }
        }
    }

    /// The stored state of a job.
    pub async fn job(&self, job_id: &str) -> Result<JobReport, ReportError> {
        let key = JobKey::parse(job_id)?;
        let guard = self.store.lock(&key).await?;
        Ok(guard.require()?.report())
    }

    fn audit_validation(&self, key: &JobKey, warnings: &[ValidationWarning]) {
        for w in warnings {
            self.audit.record(
                AuditEvent::new("validation_warning", key.id())
                    .slide(&w.slide_key)
                    .severity(w.severity)
                    .details(json!({
                        "token": w.token,
                        "expected": w.expected,
                        "observed": w.observed,
                    })),
            );
        }
    }

    fn audit_fallbacks(&self, key: &JobKey, sources: &BTreeMap<String, ContentSource>) {
        let degraded: BTreeMap<&String, &ContentSource> = sources
            .iter()
            .filter(|(_, s)| **s != ContentSource::Live)
            .collect();
        if degraded.is_empty() {
            return;
        }
        self.audit.record(
            AuditEvent::new("generation_fallback", key.id())
                .severity(Severity::Warning)
                .details(json!({ "slides": degraded })),
        );
    }
}

/// Apply caller overrides to a freshly generated slide.
fn apply_overrides(
    template: &TemplateDescriptor,
    content: &mut SlideContent,
    overrides: &Map<String, Value>,
) -> Result<(), ReportError> {
    let Some(slide) = template.slide(&content.slide_key) else {
        return Err(ReportError::UnknownSlide {
            template_id: template.template_id.clone(),
            slide_key: content.slide_key.clone(),
        });
    };
    for (token, value) in overrides {
        let Some(p) = slide.placeholder(token) else {
            return Err(ReportError::UnknownToken {
                slide_key: slide.slide_key.clone(),
                token: token.clone(),
            });
        };
        let value = if p.kind.is_textual() {
            coerce(value, p.kind).unwrap_or_else(|| value.clone())
        } else {
            value.clone()
        };
        content.set(token.clone(), value);
    }
    Ok(())
}
