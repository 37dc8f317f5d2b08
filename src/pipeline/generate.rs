//! Content generation: resolve every slot of the slides in scope.
//!
//! Extracted slots are copied from the facts. AI slots walk a three-tier
//! chain, decided per slot at call time:
//!
//! ```text
//!  live backend ──(unresolved)──▶ recorded slidespec ──(unresolved)──▶ deterministic
//! ```
//!
//! The live tier sends size-bounded batches (see [`crate::pipeline::batch`])
//! through a retry loop driven by [`RetryPolicy`]. A batch that exhausts its
//! attempts, or hits a non-transient error, simply leaves its slots
//! unresolved; the lower tiers always produce something, so a missing or
//! broken provider never fails the job.
//!
//! With `concurrency > 1` batches are dispatched through
//! `buffer_unordered`; results are keyed by slide, and slides are emitted in
//! slide-number order, so completion order never shows in the output.

use crate::config::GenerationConfig;
use crate::error::{GenerationError, ReportError};
use crate::job::JobKey;
use crate::output::{ContentSource, Warning};
use crate::pipeline::batch::{plan_batches, Batch, BatchState, SlideRequest};
use crate::pipeline::extract::ExtractedFacts;
use crate::pipeline::fallback::{recorded_value, synthesize, RecordedResponses};
use crate::pipeline::llm::{resolve_backend, GenerationBackend, GenerationRequest, RetryPolicy};
use crate::pipeline::parse::{parse_batch_response, ParsedSlides};
use crate::progress::ProgressCallback;
use crate::prompts::{batch_user_message, DEFAULT_SYSTEM_PROMPT};
use crate::slidespec::{SlideContent, SlideSpec};
use crate::template::{
    GenerationMode, PlaceholderDefinition, SlideDescriptor, TemplateDescriptor,
};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which slides a generation pass covers.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationScope {
    All,
    /// A single-slide rewrite, optionally steered by extra guidance.
    Slide {
        slide_key: String,
        instruction: Option<String>,
    },
}

/// Slides produced by one pass, in slide order.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    pub slides: Vec<SlideContent>,
    /// Lowest tier used per slide with AI slots.
    pub sources: BTreeMap<String, ContentSource>,
    pub warnings: Vec<Warning>,
}

impl GenerationOutcome {
    /// Assemble a full slidespec (only meaningful for [`GenerationScope::All`]).
    pub fn slidespec(&self, template_id: &str) -> SlideSpec {
        let mut spec = SlideSpec::new(template_id);
        for slide in &self.slides {
            spec.upsert(slide.clone());
        }
        spec
    }
}

pub struct ContentGenerator {
    backend: Option<Arc<dyn GenerationBackend>>,
    recorded: RecordedResponses,
    policy: RetryPolicy,
    max_batch_chars: usize,
    concurrency: usize,
    system_prompt: String,
    progress: ProgressCallback,
}

impl ContentGenerator {
    /// Build a generator, resolving the live backend from `config`.
    pub fn new(config: &GenerationConfig, progress: ProgressCallback) -> Self {
        Self::with_backend(resolve_backend(config), config, progress)
    }

    /// Build a generator around an explicit backend (or none).
    pub fn with_backend(
        backend: Option<Arc<dyn GenerationBackend>>,
        config: &GenerationConfig,
        progress: ProgressCallback,
    ) -> Self {
        Self {
            backend,
            recorded: RecordedResponses::new(config.recorded_dir.clone()),
            policy: RetryPolicy::from_config(config),
            max_batch_chars: config.max_batch_chars,
            concurrency: config.concurrency.max(1),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            progress,
        }
    }

    /// Name of the live backend, or `None` when the live tier is off.
    pub fn backend_name(&self) -> Option<&str> {
        self.backend.as_deref().map(|b| b.name())
    }

    /// Resolve every slot of the slides in `scope`.
    ///
    /// # Errors
    /// [`ReportError::UnknownSlide`] when a slide scope names a slide the
    /// template does not declare. Generation failures never surface here.
    pub async fn generate(
        &self,
        key: &JobKey,
        template: &TemplateDescriptor,
        facts: &ExtractedFacts,
        scope: &GenerationScope,
    ) -> Result<GenerationOutcome, ReportError> {
        let (slides, extra): (Vec<&SlideDescriptor>, Option<&str>) = match scope {
            GenerationScope::All => (template.slides.iter().collect(), None),
            GenerationScope::Slide {
                slide_key,
                instruction,
            } => {
                let slide = template
                    .slide(slide_key)
                    .ok_or_else(|| ReportError::UnknownSlide {
                        template_id: template.template_id.clone(),
                        slide_key: slide_key.clone(),
                    })?;
                (vec![slide], instruction.as_deref())
            }
        };

        let requests: Vec<SlideRequest> = slides
            .iter()
            .filter_map(|s| SlideRequest::for_slide(s, facts.slide(&s.slide_key), extra))
            .collect();

        let live = self.run_live(&requests).await;

        let unresolved = requests.iter().any(|r| {
            r.slots
                .iter()
                .any(|slot| live_value(&live, &r.slide_key, &slot.token).is_none())
        });
        let recorded = if unresolved {
            self.recorded.load(key).await
        } else {
            None
        };

        let mut outcome = GenerationOutcome::default();
        for slide in slides {
            let mut content = SlideContent::new(slide.slide_no, &slide.slide_key);
            let slide_facts = facts.slide(&slide.slide_key);
            let request = requests.iter().find(|r| r.slide_key == slide.slide_key);

            let mut tier: Option<ContentSource> = None;
            let mut fell_through: Vec<&str> = Vec::new();

            for p in &slide.placeholders {
                let value = match p.mode() {
                    GenerationMode::Extracted => slide_facts
                        .and_then(|f| f.values.get(&p.token))
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new())),
                    GenerationMode::AiGenerated => {
                        let (value, source) = resolve_slot(
                            &live,
                            recorded.as_ref(),
                            request,
                            &slide.slide_key,
                            p,
                        );
                        if source != ContentSource::Live {
                            fell_through.push(p.token.as_str());
                        }
                        tier = tier.max(Some(source));
                        value
                    }
                };
                content.set(&p.token, value);
            }

            if let Some(source) = tier {
                outcome.sources.insert(slide.slide_key.clone(), source);
                if !fell_through.is_empty() {
                    let reason = if self.backend.is_some() {
                        "live generation did not resolve"
                    } else {
                        "live generation unavailable for"
                    };
                    outcome.warnings.push(Warning::Generation {
                        slide_key: slide.slide_key.clone(),
                        detail: format!("{reason} {}", fell_through.join(", ")),
                        source,
                    });
                }
            }
            outcome.slides.push(content);
        }
        outcome.slides.sort_by_key(|s| s.slide_no);

        info!(
            "Generated {} slide(s) for {} ({} with AI content)",
            outcome.slides.len(),
            key,
            outcome.sources.len()
        );
        Ok(outcome)
    }

    // ── Live tier ────────────────────────────────────────────────────────

    async fn run_live(&self, requests: &[SlideRequest]) -> ParsedSlides {
        let mut merged = ParsedSlides::new();
        let Some(backend) = self.backend.as_deref() else {
            return merged;
        };
        if requests.is_empty() {
            return merged;
        }

        let batches = plan_batches(requests.to_vec(), self.max_batch_chars);
        let total = batches.len();
        self.progress.on_generation_start(total, requests.len());
        debug!(
            "Dispatching {} batch(es) to {} (concurrency {})",
            total,
            backend.name(),
            self.concurrency
        );

        let mut results: Vec<(usize, Result<ParsedSlides, GenerationError>)> =
            stream::iter(batches.into_iter().map(|b| self.run_batch(backend, b)))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut succeeded = 0;
        for (_, result) in results {
            if let Ok(parsed) = result {
                succeeded += 1;
                merged.extend(parsed);
            }
        }
        self.progress.on_generation_complete(total, succeeded);
        merged
    }

    /// Drive one batch to a terminal state.
    async fn run_batch(
        &self,
        backend: &dyn GenerationBackend,
        mut batch: Batch,
    ) -> (usize, Result<ParsedSlides, GenerationError>) {
        let request = GenerationRequest {
            system: self.system_prompt.clone(),
            user: batch_user_message(&batch.slides),
        };

        loop {
            batch.advance(BatchState::InFlight);
            let attempt = batch.attempts();
            self.progress.on_batch_start(batch.index, attempt);

            let result = match backend.complete(&request).await {
                Ok(text) => parse_batch_response(&text, &batch.slides),
                Err(e) => Err(e),
            };

            match result {
                Ok(parsed) => {
                    batch.advance(BatchState::Success);
                    self.progress.on_batch_complete(batch.index, parsed.len());
                    debug!(
                        "Batch {} resolved {} slide(s) on attempt {}",
                        batch.index,
                        parsed.len(),
                        attempt
                    );
                    return (batch.index, Ok(parsed));
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    batch.advance(BatchState::RetryableFailure);
                    let wait = self.policy.backoff_for(attempt, e.retry_after());
                    warn!(
                        "Batch {} attempt {}/{} failed: {}; retrying in {}ms",
                        batch.index,
                        attempt,
                        self.policy.max_attempts,
                        e,
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    batch.advance(BatchState::FatalFailure);
                    warn!(
                        "Batch {} ({}) gave up after {} attempt(s): {}",
                        batch.index,
                        batch.slide_keys().collect::<Vec<_>>().join(", "),
                        attempt,
                        e
                    );
                    self.progress.on_batch_error(batch.index, &e.to_string());
                    return (batch.index, Err(e));
                }
            }
        }
    }
}

fn live_value(live: &ParsedSlides, slide_key: &str, token: &str) -> Option<Value> {
    live.get(slide_key)?.get(token).cloned()
}

/// Walk the tiers for one AI slot.
fn resolve_slot(
    live: &ParsedSlides,
    recorded: Option<&SlideSpec>,
    request: Option<&SlideRequest>,
    slide_key: &str,
    p: &PlaceholderDefinition,
) -> (Value, ContentSource) {
    let token = p.token.as_str();
    if let Some(v) = live_value(live, slide_key, token) {
        return (v, ContentSource::Live);
    }
    if let Some(v) = recorded.and_then(|r| recorded_value(r, slide_key, token, p.kind)) {
        return (v, ContentSource::Recorded);
    }
    let synthesized = request
        .and_then(|r| r.slot(token).map(|slot| synthesize(r, slot)))
        .unwrap_or_else(|| Value::String(String::new()));
    (synthesized, ContentSource::Deterministic)
}
