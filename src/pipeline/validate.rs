//! Validation: completeness of the slot map and grounding of AI numbers.
//!
//! Two independent checks:
//!
//! * [`check_completeness`] is a hard precondition for rendering. Every
//!   token the template declares must have a non-null value.
//! * [`fact_check`] is advisory. Every number embedded in AI-written text is
//!   compared with the extracted facts that ground it; a number that matches
//!   none of them within tolerance yields a [`ValidationWarning`]. Extracted
//!   values are the only source of truth here; AI text never grounds AI text.

use crate::config::ValidationConfig;
use crate::error::ReportError;
use crate::output::{Severity, ValidationWarning};
use crate::pipeline::extract::ExtractedFacts;
use crate::slidespec::{as_number, display_string, SlideSpec};
use crate::template::{SlideDescriptor, TemplateDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Fail with [`ReportError::SchemaIncomplete`] on the first declared token
/// that is missing or null.
pub fn check_completeness(template: &TemplateDescriptor, spec: &SlideSpec) -> Result<(), ReportError> {
    for slide in &template.slides {
        let content = spec.slide(&slide.slide_key);
        for p in &slide.placeholders {
            let present = content
                .and_then(|c| c.placeholders.get(&p.token))
                .is_some_and(|v| !v.is_null());
            if !present {
                return Err(ReportError::SchemaIncomplete {
                    slide_key: slide.slide_key.clone(),
                    token: p.token.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Check AI-written numbers against extracted facts.
///
/// `only_slide` restricts the check to one slide (rewrites). At most one
/// warning is produced per token: the first unmatched claim, compared with
/// its nearest fact.
pub fn fact_check(
    template: &TemplateDescriptor,
    facts: &ExtractedFacts,
    spec: &SlideSpec,
    config: &ValidationConfig,
    only_slide: Option<&str>,
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    for slide in &template.slides {
        if only_slide.is_some_and(|k| k != slide.slide_key) {
            continue;
        }
        for p in slide.ai_placeholders() {
            let Some(value) = spec.get(&slide.slide_key, &p.token) else {
                continue;
            };
            let text = value_text(value);
            let claims = extract_claims(&text);
            if claims.is_empty() {
                continue;
            }
            let grounding = grounding_facts(slide, &p.fact_refs, facts);
            if grounding.is_empty() {
                continue;
            }
            if let Some(w) = first_mismatch(&claims, &grounding, config) {
                warnings.push(ValidationWarning {
                    slide_key: slide.slide_key.clone(),
                    token: p.token.clone(),
                    expected: w.expected,
                    observed: w.observed,
                    severity: w.severity,
                });
            }
        }
    }
    warnings
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(display_string).collect::<Vec<_>>().join("\n"),
        other => display_string(other),
    }
}

// ── Claims ───────────────────────────────────────────────────────────────

/// A number stated in generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub text: String,
    pub value: f64,
    pub percent: bool,
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?(?:\s?%)?").unwrap()
});

/// Numbers in `text`: integers, `1,234`, decimals and percentages. A
/// number glued to an identifier (`CVE-2024-1234`, `W1`, `x86_64`, `v2.1`)
/// is not a claim.
pub fn extract_claims(text: &str) -> Vec<Claim> {
    let mut claims = Vec::new();
    for m in RE_NUMBER.find_iter(text) {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        if before.is_some_and(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.')) {
            continue;
        }
        if after.is_some_and(|c| c.is_alphabetic() || c == '_' || (c == '-' && !m.as_str().ends_with('%'))) {
            continue;
        }
        let raw = m.as_str();
        let percent = raw.ends_with('%');
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
        if let Ok(value) = digits.parse::<f64>() {
            claims.push(Claim {
                text: raw.to_string(),
                value,
                percent,
            });
        }
    }
    claims
}

// ── Grounding ────────────────────────────────────────────────────────────

/// Numbers a token's claims may cite.
///
/// With `fact_refs` these are the referenced extracted values (`TOKEN` on
/// the same slide, `slide_key.TOKEN` elsewhere); otherwise every extracted
/// value on the slide. Chart and table payloads contribute every number
/// they contain.
fn grounding_facts(slide: &SlideDescriptor, fact_refs: &[String], facts: &ExtractedFacts) -> Vec<f64> {
    let mut out = Vec::new();
    if fact_refs.is_empty() {
        if let Some(sf) = facts.slide(&slide.slide_key) {
            for v in sf.values.values() {
                collect_numbers(v, &mut out);
            }
        }
        return out;
    }
    for r in fact_refs {
        let (slide_key, token) = match r.split_once('.') {
            Some((s, t)) => (s, t),
            None => (slide.slide_key.as_str(), r.as_str()),
        };
        if let Some(v) = facts.slide(slide_key).and_then(|sf| sf.values.get(token)) {
            collect_numbers(v, &mut out);
        }
    }
    out
}

fn collect_numbers(v: &Value, out: &mut Vec<f64>) {
    match v {
        Value::Array(items) => items.iter().for_each(|i| collect_numbers(i, out)),
        Value::Object(obj) => obj.values().for_each(|i| collect_numbers(i, out)),
        other => {
            if let Some(n) = as_number(other) {
                out.push(n);
            }
        }
    }
}

// ── Matching ─────────────────────────────────────────────────────────────

struct Mismatch {
    expected: String,
    observed: String,
    severity: Severity,
}

fn within(claim: f64, fact: f64, config: &ValidationConfig) -> bool {
    let diff = (claim - fact).abs();
    diff <= config.absolute_tolerance || diff <= config.relative_tolerance * fact.abs()
}

/// Fact candidates for a claim: the fact itself, plus `fact * 100` for
/// percentage claims against fractional facts.
fn candidates(claim: &Claim, facts: &[f64]) -> Vec<f64> {
    let mut c = facts.to_vec();
    if claim.percent {
        c.extend(facts.iter().filter(|f| f.abs() <= 1.0).map(|f| f * 100.0));
    }
    c
}

fn first_mismatch(claims: &[Claim], facts: &[f64], config: &ValidationConfig) -> Option<Mismatch> {
    for claim in claims {
        if claim.value.abs() < config.ignore_below {
            continue;
        }
        let cands = candidates(claim, facts);
        if cands.iter().any(|f| within(claim.value, *f, config)) {
            continue;
        }
        let nearest = cands
            .iter()
            .copied()
            .min_by(|a, b| (claim.value - a).abs().total_cmp(&(claim.value - b).abs()))?;
        let deviation = (claim.value - nearest).abs() / nearest.abs().max(f64::EPSILON);
        return Some(Mismatch {
            expected: format_number(nearest),
            observed: claim.text.clone(),
            severity: Severity::from_deviation(deviation),
        });
    }
    None
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{n:.4}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TenantInput;
    use crate::pipeline::extract::extract_facts;
    use crate::slidespec::SlideContent;
    use serde_json::json;

    fn values(claims: &[Claim]) -> Vec<f64> {
        claims.iter().map(|c| c.value).collect()
    }

    #[test]
    fn claims_cover_common_number_forms() {
        let c = extract_claims("We saw 1,234 alerts, 12.5% more than 980 last week; 3 % were critical.");
        assert_eq!(values(&c), [1234.0, 12.5, 980.0, 3.0]);
        assert!(c[1].percent && c[3].percent);
        assert!(!c[0].percent);
    }

    #[test]
    fn identifiers_are_not_claims() {
        let c = extract_claims("Patch CVE-2024-1234 on host W1 and srv_02 (x86_64, v2.1).");
        assert!(c.is_empty(), "got {c:?}");
    }

    #[test]
    fn sentence_final_period_is_not_a_decimal() {
        assert_eq!(values(&extract_claims("Total was 42.")), [42.0]);
    }

    fn fixture() -> (TemplateDescriptor, ExtractedFacts) {
        let template = TemplateDescriptor::from_json(
            &json!({
                "template_id": "t",
                "slides": [
                    {"slide_no": 1, "slide_key": "alerts", "placeholders": [
                        {"token": "ALERT_TOTAL", "type": "text", "source": "alerts.total"},
                        {"token": "COVERAGE", "type": "text", "source": "edr.coverage"},
                        {"token": "SUMMARY", "type": "paragraph", "ai_generate": true},
                        {"token": "REFS", "type": "paragraph", "ai_generate": true,
                         "fact_refs": ["ALERT_TOTAL"]}
                    ]},
                    {"slide_no": 2, "slide_key": "other", "placeholders": [
                        {"token": "NOTE", "type": "text", "ai_generate": true,
                         "fact_refs": ["alerts.COVERAGE"]}
                    ]}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let input = TenantInput::new("acme", json!({"alerts": {"total": 1234}, "edr": {"coverage": 0.25}}));
        let facts = extract_facts(&input, &template);
        (template, facts)
    }

    fn spec(summary: &str, refs: &str, note: &str) -> SlideSpec {
        let mut spec = SlideSpec::new("t");
        let mut a = SlideContent::new(1, "alerts");
        a.set("ALERT_TOTAL", json!(1234));
        a.set("COVERAGE", json!(0.25));
        a.set("SUMMARY", json!(summary));
        a.set("REFS", json!(refs));
        spec.upsert(a);
        let mut o = SlideContent::new(2, "other");
        o.set("NOTE", json!(note));
        spec.upsert(o);
        spec
    }

    #[test]
    fn grounded_claims_pass() {
        let (t, f) = fixture();
        let s = spec(
            "1,234 alerts were raised; EDR covers 25% of endpoints.",
            "1234 alerts in total.",
            "Coverage stands at 25.0 %.",
        );
        assert!(fact_check(&t, &f, &s, &ValidationConfig::default(), None).is_empty());
    }

    #[test]
    fn out_of_tolerance_claim_yields_one_warning_for_that_token() {
        let (t, f) = fixture();
        let s = spec(
            "5,000 alerts and 7,000 incidents were raised.",
            "1234 alerts.",
            "Coverage is 25%.",
        );
        let w = fact_check(&t, &f, &s, &ValidationConfig::default(), None);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].token, "SUMMARY");
        assert_eq!(w[0].observed, "5,000");
        assert_eq!(w[0].expected, "1234");
        assert_eq!(w[0].severity, Severity::Critical);
    }

    #[test]
    fn fact_refs_narrow_grounding() {
        let (t, f) = fixture();
        // 25 % is on the slide but REFS only cites ALERT_TOTAL.
        let s = spec("No numbers here.", "Coverage is 25%.", "Coverage is 25%.");
        let w = fact_check(&t, &f, &s, &ValidationConfig::default(), None);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].token, "REFS");
    }

    #[test]
    fn rounding_within_tolerance() {
        let (t, f) = fixture();
        let s = spec("About 1,240 alerts.", "1234", "25%");
        assert!(fact_check(&t, &f, &s, &ValidationConfig::default(), None).is_empty());
        let strict = ValidationConfig {
            absolute_tolerance: 0.0,
            relative_tolerance: 0.0,
            ignore_below: 0.0,
        };
        assert_eq!(fact_check(&t, &f, &s, &strict, None).len(), 1);
    }

    #[test]
    fn scoped_to_one_slide() {
        let (t, f) = fixture();
        let s = spec("9999 alerts", "1234", "Coverage 10%");
        let w = fact_check(&t, &f, &s, &ValidationConfig::default(), Some("other"));
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].slide_key, "other");
    }

    #[test]
    fn completeness_names_slide_and_token() {
        let (t, _) = fixture();
        let mut s = spec("a", "b", "c");
        assert!(check_completeness(&t, &s).is_ok());
        s.slide_mut("other").unwrap().set("NOTE", Value::Null);
        match check_completeness(&t, &s) {
            Err(ReportError::SchemaIncomplete { slide_key, token }) => {
                assert_eq!(slide_key, "other");
                assert_eq!(token, "NOTE");
            }
            other => panic!("expected SchemaIncomplete, got {other:?}"),
        }
    }
}
