//! Batching: pack slides with AI slots into size-bounded requests.
//!
//! One request per slide wastes the system prompt and the model's warm-up on
//! every call; one request for the whole deck overruns small-context models
//! and makes a single failure cost every slide. Batches are packed greedily
//! in slide order until the serialised context would exceed
//! `max_batch_chars`. A slide is never split across batches; a slide that is
//! oversized on its own gets a batch of its own.
//!
//! ## Batch lifecycle
//!
//! ```text
//! Pending ──▶ InFlight ──▶ Success
//!                │  ▲
//!                │  └──── RetryableFailure
//!                └──────▶ FatalFailure
//! ```

use crate::pipeline::extract::SlideFacts;
use crate::template::{PlaceholderKind, SlideDescriptor};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Everything the generator needs to author one slide's AI slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideRequest {
    pub slide_no: u32,
    pub slide_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Extracted values of this slide, the grounding context.
    pub facts: Map<String, Value>,
    pub slots: Vec<AiSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiSlot {
    pub token: String,
    pub kind: PlaceholderKind,
    pub instruction: String,
}

impl SlideRequest {
    /// Build the request for a slide, or `None` when it has no AI slots.
    ///
    /// `extra_instruction` is appended to every slot's instruction; rewrites
    /// use it to carry the caller's steering text.
    pub fn for_slide(
        slide: &SlideDescriptor,
        facts: Option<&SlideFacts>,
        extra_instruction: Option<&str>,
    ) -> Option<Self> {
        let slots: Vec<AiSlot> = slide
            .ai_placeholders()
            .map(|p| {
                let base = p
                    .ai_instruction
                    .clone()
                    .unwrap_or_else(|| format!("Write the {} for this slide.", humanize(&p.token)));
                let instruction = match extra_instruction.map(str::trim) {
                    Some(extra) if !extra.is_empty() => format!("{base} Additional guidance: {extra}"),
                    _ => base,
                };
                AiSlot {
                    token: p.token.clone(),
                    kind: p.kind,
                    instruction,
                }
            })
            .collect();
        if slots.is_empty() {
            return None;
        }
        Some(Self {
            slide_no: slide.slide_no,
            slide_key: slide.slide_key.clone(),
            title: slide.title.clone(),
            facts: facts.map(|f| f.values.clone()).unwrap_or_default(),
            slots,
        })
    }

    /// Characters of the serialised per-slide context.
    pub fn estimated_chars(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    pub fn slot(&self, token: &str) -> Option<&AiSlot> {
        self.slots.iter().find(|s| s.token == token)
    }
}

/// `ALERT_SUMMARY` → `alert summary`.
pub fn humanize(token: &str) -> String {
    token.replace(['_', '.'], " ").to_lowercase()
}

// ── Lifecycle ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    InFlight,
    Success,
    RetryableFailure,
    FatalFailure,
}

impl BatchState {
    pub fn can_advance_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Success)
                | (InFlight, RetryableFailure)
                | (InFlight, FatalFailure)
                | (RetryableFailure, InFlight)
                | (RetryableFailure, FatalFailure)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Success | BatchState::FatalFailure)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchState::Pending => "PENDING",
            BatchState::InFlight => "IN_FLIGHT",
            BatchState::Success => "SUCCESS",
            BatchState::RetryableFailure => "RETRYABLE_FAILURE",
            BatchState::FatalFailure => "FATAL_FAILURE",
        })
    }
}

/// A group of slides sent in one generation request.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub slides: Vec<SlideRequest>,
    state: BatchState,
    attempts: u32,
}

impl Batch {
    pub fn new(index: usize, slides: Vec<SlideRequest>) -> Self {
        Self {
            index,
            slides,
            state: BatchState::Pending,
            attempts: 0,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Move to `next` if the transition is legal. Entering `InFlight` counts
    /// an attempt. Returns false (and stays put) on an illegal transition.
    pub fn advance(&mut self, next: BatchState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        if next == BatchState::InFlight {
            self.attempts += 1;
        }
        self.state = next;
        true
    }

    pub fn slide_keys(&self) -> impl Iterator<Item = &str> {
        self.slides.iter().map(|s| s.slide_key.as_str())
    }

    pub fn estimated_chars(&self) -> usize {
        self.slides.iter().map(SlideRequest::estimated_chars).sum()
    }
}

/// Partition requests into batches of at most `max_chars` serialised
/// context, preserving slide order.
pub fn plan_batches(requests: Vec<SlideRequest>, max_chars: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<SlideRequest> = Vec::new();
    let mut current_chars = 0usize;

    for req in requests {
        let size = req.estimated_chars();
        if !current.is_empty() && current_chars + size > max_chars {
            batches.push(Batch::new(batches.len(), std::mem::take(&mut current)));
            current_chars = 0;
        }
        current_chars += size;
        current.push(req);
    }
    if !current.is_empty() {
        batches.push(Batch::new(batches.len(), current));
    }
    batches
}
