//! Response parsing: recover the token map from model output.
//!
//! Models are asked for bare JSON but routinely wrap it in code fences, add
//! a sentence of preamble, or echo part of the prompt. Parsing therefore:
//!
//! 1. strips code fences,
//! 2. finds every well-formed top-level JSON object in the text and keeps
//!    the largest one,
//! 3. accepts three shapes, in order:
//!    `{"slides": [{"slide_key": .., "placeholders": {..}}]}`,
//!    `{"<slide_key>": {..}}`, or, for a single-slide batch, a bare
//!    `{"TOKEN": value}` map,
//! 4. coerces each value to its slot kind and drops tokens nobody asked for.
//!
//! A response in which no requested slide can be found is a
//! [`GenerationError::Parse`], which the retry loop treats as transient.

use crate::error::GenerationError;
use crate::pipeline::batch::SlideRequest;
use crate::slidespec::display_string;
use crate::template::PlaceholderKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Resolved AI values, keyed by slide key then token.
pub type ParsedSlides = HashMap<String, Map<String, Value>>;

/// Parse one batch response.
///
/// Slides or tokens missing from the response are simply absent from the
/// result; the generator falls back to the next tier for them.
pub fn parse_batch_response(
    text: &str,
    slides: &[SlideRequest],
) -> Result<ParsedSlides, GenerationError> {
    let cleaned = strip_code_fences(text);
    let root = largest_json_object(&cleaned).ok_or_else(|| GenerationError::Parse {
        detail: format!("no JSON object in response ({} chars)", text.len()),
    })?;

    let raw = locate_slides(&root, slides);
    let mut parsed = ParsedSlides::new();
    for slide in slides {
        let Some(tokens) = raw.get(slide.slide_key.as_str()) else {
            continue;
        };
        let mut values = Map::new();
        for (token, value) in tokens.iter() {
            let Some(slot) = slide.slot(token) else {
                debug!("{}: dropping unrequested token '{}'", slide.slide_key, token);
                continue;
            };
            if let Some(v) = coerce(value, slot.kind) {
                values.insert(token.to_string(), v);
            }
        }
        parsed.insert(slide.slide_key.clone(), values);
    }

    if parsed.is_empty() {
        return Err(GenerationError::Parse {
            detail: "response names none of the requested slides".into(),
        });
    }
    Ok(parsed)
}

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*```[A-Za-z0-9_-]*\s*$").unwrap());

fn strip_code_fences(text: &str) -> String {
    RE_FENCE.replace_all(text, "").into_owned()
}

/// The longest top-level JSON object embedded anywhere in `text`.
fn largest_json_object(text: &str) -> Option<Map<String, Value>> {
    let mut best: Option<(usize, Map<String, Value>)> = None;
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('{') {
        let start = pos + rel;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(obj))) => {
                let len = stream.byte_offset();
                if best.as_ref().map_or(true, |(l, _)| len > *l) {
                    best = Some((len, obj));
                }
                pos = start + len.max(1);
            }
            _ => pos = start + 1,
        }
    }
    best.map(|(_, obj)| obj)
}

/// Normalise the accepted response shapes to `slide_key → token map`.
fn locate_slides<'a>(
    root: &'a Map<String, Value>,
    slides: &[SlideRequest],
) -> HashMap<String, &'a Map<String, Value>> {
    let mut out = HashMap::new();

    if let Some(Value::Array(items)) = root.get("slides") {
        for item in items {
            let Some(obj) = item.as_object() else { continue };
            let Some(key) = obj.get("slide_key").and_then(Value::as_str) else {
                continue;
            };
            let tokens = match obj.get("placeholders").and_then(Value::as_object) {
                Some(p) => p,
                None => obj,
            };
            out.insert(key.to_string(), tokens);
        }
        return out;
    }

    for slide in slides {
        if let Some(Value::Object(tokens)) = root.get(slide.slide_key.as_str()) {
            out.insert(slide.slide_key.clone(), tokens);
        }
    }
    if !out.is_empty() {
        return out;
    }

    if let [only] = slides {
        if only.slots.iter().any(|s| root.contains_key(&s.token)) {
            out.insert(only.slide_key.clone(), root);
        }
    }
    out
}

static RE_BULLET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•·]|\d+[.)])\s+").unwrap());

/// Coerce a raw value to a slot kind. `None` means "not resolved".
pub fn coerce(value: &Value, kind: PlaceholderKind) -> Option<Value> {
    match kind {
        PlaceholderKind::BulletList => {
            let items: Vec<String> = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|i| display_string(i).trim().to_string())
                    .collect(),
                Value::String(s) => s
                    .lines()
                    .map(|l| RE_BULLET_PREFIX.replace(l, "").trim().to_string())
                    .collect(),
                Value::Number(_) | Value::Bool(_) => vec![display_string(value)],
                _ => return None,
            };
            let items: Vec<Value> = items
                .into_iter()
                .filter(|i| !i.is_empty())
                .map(Value::String)
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        _ => {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Array(items) => items
                    .iter()
                    .map(|i| display_string(i).trim().to_string())
                    .filter(|i| !i.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n"),
                Value::Number(_) | Value::Bool(_) => display_string(value),
                _ => return None,
            };
            (!text.is_empty()).then_some(Value::String(text))
        }
    }
}
