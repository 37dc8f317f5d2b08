//! Fill a PPTX template from a slidespec.
//!
//! Markers are `{{TOKEN}}` strings typed into the template's text boxes.
//! Each slide is processed in a fixed order:
//!
//! 1. **Lists**: the paragraph holding a list marker is cloned once per item.
//! 2. **Charts and tables**: a native object is drawn at the slot's
//!    configured frame and the marker is blanked.
//! 3. **Text**: markers inside runs are replaced in place, keeping the run's
//!    formatting; multi-line values become `<a:br/>` breaks.
//! 4. **Leftovers**: any marker still present has no value; it is blanked
//!    and reported.
//!
//! The package is written with [`write_atomic`], so a failed render never
//! leaves a half-written artifact where a previous good one stood.

use crate::error::ReportError;
use crate::output::{write_atomic, Warning};
use crate::pipeline::drawing::{
    append_to_shape_tree, chart_frame, chart_part, escape_xml, next_shape_id, table_frame,
    ChartKind,
};
use crate::pipeline::pptx::{Package, CT_CHART, REL_CHART};
use crate::slidespec::{display_string, ChartPayload, SlideContent, SlideSpec, TablePayload};
use crate::template::{PlaceholderDefinition, PlaceholderKind, SlideDescriptor, TemplateDescriptor};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BULLET: &str = "• ";

/// What a render produced.
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub path: PathBuf,
    pub warnings: Vec<Warning>,
    pub charts: usize,
    pub tables: usize,
}

/// Render `spec` into a copy of `document`, written to `output`.
pub async fn render_deck(
    document: &Path,
    template: &TemplateDescriptor,
    spec: &SlideSpec,
    output: &Path,
) -> Result<RenderOutcome, ReportError> {
    let mut pkg = Package::open(document).await?;
    let mut outcome = fill_package(&mut pkg, template, spec)?;
    let bytes = pkg.to_bytes()?;
    write_atomic(output, &bytes).await?;
    outcome.path = output.to_path_buf();
    info!(
        "Rendered {} ({} chart(s), {} table(s), {} warning(s))",
        output.display(),
        outcome.charts,
        outcome.tables,
        outcome.warnings.len()
    );
    Ok(outcome)
}

/// Fill every declared slide of `pkg` in memory.
pub fn fill_package(
    pkg: &mut Package,
    template: &TemplateDescriptor,
    spec: &SlideSpec,
) -> Result<RenderOutcome, ReportError> {
    let mut outcome = RenderOutcome::default();
    for slide in &template.slides {
        let Some(part) = pkg.slide_part(slide.slide_no)? else {
            warn!(
                "Template document has no slide {} ({})",
                slide.slide_no, slide.slide_key
            );
            outcome.warnings.push(Warning::Render {
                slide_key: slide.slide_key.clone(),
                token: String::new(),
                detail: format!("document has no slide {}", slide.slide_no),
            });
            continue;
        };
        render_slide(pkg, &part, slide, spec.slide(&slide.slide_key), &mut outcome)?;
    }
    Ok(outcome)
}

fn render_slide(
    pkg: &mut Package,
    part: &str,
    slide: &SlideDescriptor,
    content: Option<&SlideContent>,
    outcome: &mut RenderOutcome,
) -> Result<(), ReportError> {
    let mut xml = pkg.part_str(part)?.to_string();
    let value_of = |token: &str| content.and_then(|c| c.placeholders.get(token));

    let mut text_values: HashMap<&str, String> = HashMap::new();
    for p in &slide.placeholders {
        let Some(value) = value_of(&p.token) else {
            continue;
        };
        match p.kind {
            PlaceholderKind::BulletList => {
                xml = expand_list(&xml, &p.token, &list_items(value));
            }
            PlaceholderKind::BarChart | PlaceholderKind::PieChart => {
                xml = blank_marker(&xml, &p.token);
                match draw_chart(pkg, part, &xml, p, value)? {
                    Some(updated) => {
                        xml = updated;
                        outcome.charts += 1;
                    }
                    None => outcome.warnings.push(render_warning(slide, p, "empty chart data; no chart drawn")),
                }
            }
            PlaceholderKind::NativeTable => {
                xml = blank_marker(&xml, &p.token);
                match TablePayload::from_value(value) {
                    Some(payload) if !payload.columns.is_empty() => {
                        let config = p.table_config.clone().unwrap_or_default();
                        let frame = table_frame(next_shape_id(&xml), &payload, &config);
                        xml = append_to_shape_tree(&xml, &frame).ok_or_else(|| no_shape_tree(pkg, part))?;
                        outcome.tables += 1;
                    }
                    _ => outcome.warnings.push(render_warning(slide, p, "table payload has no columns; no table drawn")),
                }
            }
            PlaceholderKind::Text | PlaceholderKind::Paragraph => {
                text_values.insert(p.token.as_str(), text_value(value));
            }
        }
    }

    xml = replace_in_runs(&xml, &text_values);

    let mut leftover = BTreeSet::new();
    xml = RE_MARKER
        .replace_all(&xml, |caps: &Captures| {
            leftover.insert(caps[1].to_string());
            String::new()
        })
        .into_owned();
    for token in leftover {
        debug!("Blanked marker {{{{{}}}}} on {}", token, slide.slide_key);
        outcome.warnings.push(Warning::Render {
            slide_key: slide.slide_key.clone(),
            token,
            detail: "marker has no value; blanked".into(),
        });
    }

    pkg.set_part(part, xml);
    Ok(())
}

fn render_warning(slide: &SlideDescriptor, p: &PlaceholderDefinition, detail: &str) -> Warning {
    Warning::Render {
        slide_key: slide.slide_key.clone(),
        token: p.token.clone(),
        detail: detail.into(),
    }
}

fn no_shape_tree(pkg: &Package, part: &str) -> ReportError {
    ReportError::TemplateCorrupt {
        path: pkg.source().to_path_buf(),
        detail: format!("{part}: no <p:spTree>"),
    }
}

// ── Charts ───────────────────────────────────────────────────────────────

/// Add a chart part for `p` and its frame to the slide. `None` when the
/// payload is empty.
fn draw_chart(
    pkg: &mut Package,
    part: &str,
    xml: &str,
    p: &PlaceholderDefinition,
    value: &Value,
) -> Result<Option<String>, ReportError> {
    let Some(payload) = ChartPayload::from_value(value).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    let config = p.chart_config.clone().unwrap_or_default();
    let kind = match p.kind {
        PlaceholderKind::PieChart => ChartKind::Pie,
        _ => ChartKind::Bar,
    };

    let chart_name = pkg.next_chart_part();
    pkg.set_part(&chart_name, chart_part(kind, &payload, config.title.as_deref()));
    pkg.add_content_type_override(&chart_name, CT_CHART)?;
    let rel_id = pkg.add_relationship(part, REL_CHART, &chart_name)?;

    let frame = chart_frame(next_shape_id(xml), &rel_id, &config.position);
    let updated = append_to_shape_tree(xml, &frame).ok_or_else(|| no_shape_tree(pkg, part))?;
    debug!("Drew {:?} chart {} for {}", kind, chart_name, p.token);
    Ok(Some(updated))
}

// ── Text ─────────────────────────────────────────────────────────────────

static RE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_.\-]+)\}\}").unwrap());

static RE_PARAGRAPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<a:p>.*?</a:p>").unwrap());

/// One whole run; runs never nest, so the lazy body stops at its own close.
static RE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<a:r>(.*?)</a:r>").unwrap());

/// Inside one run body: optional properties, then the text element.
static RE_RUN_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A(<a:rPr\b[^>]*/>|<a:rPr(?:\s[^>]*[^/])?>.*?</a:rPr>)?(<a:t(?:\s[^>]*)?>)(.*?)</a:t>\z")
        .unwrap()
});

fn marker(token: &str) -> String {
    format!("{{{{{token}}}}}")
}

fn blank_marker(xml: &str, token: &str) -> String {
    xml.replace(&marker(token), "")
}

fn text_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(display_string).collect::<Vec<_>>().join("\n"),
        other => display_string(other),
    }
}

fn list_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(display_string).collect(),
        other => display_string(other)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
    }
}

/// Clone the paragraph holding `token`'s marker once per item.
fn expand_list(xml: &str, token: &str, items: &[String]) -> String {
    let needle = marker(token);
    RE_PARAGRAPH
        .replace_all(xml, |caps: &Captures| {
            let para = &caps[0];
            if !para.contains(&needle) {
                return para.to_string();
            }
            if items.is_empty() {
                return para.replace(&needle, "");
            }
            let has_bullets = para.contains("<a:buChar") || para.contains("<a:buAutoNum");
            items
                .iter()
                .map(|item| {
                    let text = if has_bullets {
                        escape_xml(item)
                    } else {
                        escape_xml(&format!("{BULLET}{item}"))
                    };
                    para.replace(&needle, &text)
                })
                .collect()
        })
        .into_owned()
}

/// Replace text markers inside runs. A multi-line value splits its run into
/// one run per line joined by `<a:br/>`, each carrying the original run
/// properties.
fn replace_in_runs(xml: &str, values: &HashMap<&str, String>) -> String {
    if values.is_empty() {
        return xml.to_string();
    }
    RE_RUN
        .replace_all(xml, |run: &Captures| {
            let whole = &run[0];
            let Some(caps) = RE_RUN_BODY.captures(&run[1]) else {
                return whole.to_string();
            };
            let text = &caps[3];
            if !text.contains("{{") {
                return whole.to_string();
            }
            let replaced = RE_MARKER.replace_all(text, |m: &Captures| match values.get(&m[1]) {
                Some(v) => escape_xml(v),
                None => m[0].to_string(),
            });
            if !replaced.contains('\n') {
                return whole.replacen(text, &replaced, 1);
            }
            let rpr = caps.get(1).map_or("", |m| m.as_str());
            let open_t = &caps[2];
            let br_props = rpr_for_break(rpr);
            replaced
                .split('\n')
                .map(|line| format!("<a:r>{rpr}{open_t}{line}</a:t></a:r>"))
                .collect::<Vec<_>>()
                .join(&format!("<a:br>{br_props}</a:br>"))
        })
        .into_owned()
}

/// `<a:br>` takes only the run properties' attributes.
fn rpr_for_break(rpr: &str) -> String {
    match rpr.find('>') {
        Some(end) if !rpr.is_empty() => {
            let open = rpr[..end].trim_end_matches('/');
            format!("{open}/>")
        }
        _ => String::new(),
    }
}
