//! Prompts for AI-authored slide content.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing the default tone or output
//!    contract requires editing exactly one place.
//!
//! 2. **Testability**: unit tests inspect prompts directly without a live
//!    provider, so prompt regressions are easy to catch.
//!
//! Callers can override the system prompt via
//! [`crate::config::GenerationConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

use crate::pipeline::batch::SlideRequest;
use crate::template::PlaceholderKind;
use serde_json::{json, Value};

/// Default system prompt for authoring slide narrative.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a security analyst writing slides for a tenant security report.

Follow these rules precisely:

1. GROUNDING
   - Use ONLY the facts supplied for each slide
   - Every number you write must appear in, or be directly derivable from, those facts
   - If the facts do not support a statement, leave it out

2. STYLE
   - Plain, professional English; no marketing language
   - Paragraphs: 2 to 4 sentences
   - Bullet lists: 3 to 5 short items, one finding or action each
   - Text slots: one short line

3. OUTPUT FORMAT
   - Respond with a single JSON object and nothing else
   - Shape: {"slides": [{"slide_key": "...", "placeholders": {"TOKEN": value}}]}
   - Use a string for text and paragraph slots, an array of strings for bullet_list slots
   - Fill every requested token of every requested slide
   - Do NOT wrap the JSON in code fences"#;

/// User message for one batch: the per-slide contexts as JSON.
pub fn batch_user_message(slides: &[SlideRequest]) -> String {
    let payload: Vec<Value> = slides.iter().map(slide_context).collect();
    let body = serde_json::to_string_pretty(&json!({ "slides": payload }))
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "Write content for the following {} slide(s). Each slide lists its facts and the \
tokens to fill with their instructions.\n\n{}",
        slides.len(),
        body
    )
}

fn slide_context(slide: &SlideRequest) -> Value {
    let tokens: Vec<Value> = slide
        .slots
        .iter()
        .map(|s| {
            json!({
                "token": s.token,
                "type": kind_label(s.kind),
                "instruction": s.instruction,
            })
        })
        .collect();
    json!({
        "slide_key": slide.slide_key,
        "title": slide.title,
        "facts": slide.facts,
        "tokens": tokens,
    })
}

fn kind_label(kind: PlaceholderKind) -> &'static str {
    match kind {
        PlaceholderKind::Text => "text",
        PlaceholderKind::Paragraph => "paragraph",
        PlaceholderKind::BulletList => "bullet_list",
        PlaceholderKind::BarChart => "bar_chart",
        PlaceholderKind::PieChart => "pie_chart",
        PlaceholderKind::NativeTable => "native_table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::AiSlot;
    use serde_json::Map;

    #[test]
    fn system_prompt_demands_json_and_grounding() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("JSON"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("ONLY the facts"));
    }

    #[test]
    fn user_message_carries_facts_and_tokens() {
        let mut facts = Map::new();
        facts.insert("ALERT_TOTAL".into(), json!(1234));
        let slide = SlideRequest {
            slide_no: 1,
            slide_key: "overview".into(),
            title: Some("Overview".into()),
            facts,
            slots: vec![AiSlot {
                token: "SUMMARY".into(),
                kind: PlaceholderKind::Paragraph,
                instruction: "Summarise the alert posture.".into(),
            }],
        };
        let msg = batch_user_message(&[slide]);
        assert!(msg.contains("1 slide(s)"));
        assert!(msg.contains("\"ALERT_TOTAL\": 1234"));
        assert!(msg.contains("\"type\": \"paragraph\""));
        assert!(msg.contains("Summarise the alert posture."));
    }
}
