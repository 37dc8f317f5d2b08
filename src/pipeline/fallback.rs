//! The two offline content tiers.
//!
//! * **Recorded**: a slidespec captured from an earlier live run (or written
//!   by hand for demos), looked up by input id and template id.
//! * **Deterministic**: plain sentences assembled from the slide's own
//!   extracted facts. Always available, never wrong about a number, and
//!   visibly templated, so operators can tell it apart from live content.

use crate::job::JobKey;
use crate::pipeline::batch::{humanize, AiSlot, SlideRequest};
use crate::pipeline::parse::coerce;
use crate::slidespec::{display_string, SlideSpec};
use crate::template::{audience_for, PlaceholderKind};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Facts quoted per deterministic sentence or list.
const MAX_FACTS: usize = 4;

/// Directory of pre-recorded slidespecs.
///
/// File names tried, in order:
/// 1. `<input_id>_<template_id>.json`
/// 2. `<input_id>_<audience>_mock_slidespec.json`, where audience is
///    `management` for management/executive templates and `technical`
///    otherwise.
#[derive(Debug, Clone, Default)]
pub struct RecordedResponses {
    dir: Option<PathBuf>,
}

impl RecordedResponses {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn candidates(&self, key: &JobKey) -> Vec<PathBuf> {
        let Some(dir) = self.dir.as_deref() else {
            return Vec::new();
        };
        vec![
            dir.join(format!("{}_{}.json", key.input_id, key.template_id)),
            dir.join(format!(
                "{}_{}_mock_slidespec.json",
                key.input_id,
                audience_for(&key.template_id)
            )),
        ]
    }

    /// Load the first readable recorded slidespec for `key`.
    pub async fn load(&self, key: &JobKey) -> Option<SlideSpec> {
        for path in self.candidates(key) {
            match read_spec(&path).await {
                Ok(Some(spec)) => {
                    debug!("Recorded content for {} from {}", key, path.display());
                    return Some(spec);
                }
                Ok(None) => continue,
                Err(e) => warn!("Ignoring recorded content {}: {}", path.display(), e),
            }
        }
        None
    }
}

async fn read_spec(path: &Path) -> Result<Option<SlideSpec>, String> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    serde_json::from_str(&text).map(Some).map_err(|e| e.to_string())
}

/// Recorded value for one slot, shaped for `kind`; `None` when absent or empty.
pub fn recorded_value(
    spec: &SlideSpec,
    slide_key: &str,
    token: &str,
    kind: PlaceholderKind,
) -> Option<Value> {
    coerce(spec.get(slide_key, token)?, kind)
}

// ── Deterministic synthesis ──────────────────────────────────────────────

/// Build a value for `slot` from the slide's extracted facts.
pub fn synthesize(slide: &SlideRequest, slot: &AiSlot) -> Value {
    let facts = scalar_facts(&slide.facts);
    let title = slide
        .title
        .clone()
        .unwrap_or_else(|| capitalize(&humanize(&slide.slide_key)));

    if facts.is_empty() {
        let none = format!("No data available for {}.", humanize(&slide.slide_key));
        return match slot.kind {
            PlaceholderKind::BulletList => Value::Array(vec![Value::String(none)]),
            _ => Value::String(none),
        };
    }

    match slot.kind {
        PlaceholderKind::BulletList => Value::Array(
            facts
                .iter()
                .map(|(label, value)| Value::String(format!("{label}: {value}")))
                .collect(),
        ),
        PlaceholderKind::Text => {
            let (label, value) = &facts[0];
            Value::String(format!("{label}: {value}"))
        }
        _ => {
            let body: Vec<String> = facts
                .iter()
                .map(|(label, value)| format!("{label} {value}"))
                .collect();
            Value::String(format!("{title}: {}.", body.join(", ")))
        }
    }
}

/// `(Humanized label, value)` for the first scalar facts of a slide.
fn scalar_facts(facts: &Map<String, Value>) -> Vec<(String, String)> {
    facts
        .iter()
        .filter(|(_, v)| matches!(v, Value::String(_) | Value::Number(_)))
        .map(|(k, v)| (capitalize(&humanize(k)), display_string(v)))
        .filter(|(_, v)| !v.trim().is_empty())
        .take(MAX_FACTS)
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
