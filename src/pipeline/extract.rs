//! Extraction: resolve deterministic slot values from tenant input.
//!
//! Every extracted-mode placeholder is resolved by a dotted-path lookup into
//! the [`TenantInput`], then reshaped for its slot kind. Nothing here fails:
//! a missing path or a wrongly-shaped node degrades to the definition's
//! default (or an empty value of the right shape) plus a
//! [`Warning::Extraction`]. A tenant without cloud telemetry should still get
//! a deck, with the cloud slide visibly empty.
//!
//! ## Chart sources
//!
//! Bar charts accept three shapes:
//!
//! ```text
//! {"labels": ["W1","W2"], "values": [10, 15]}     parallel arrays (field names configurable)
//! {"high": 3, "medium": 9}                        category → value object
//! [{"label": "W1", "value": 10}, ...]             list of records
//! ```
//!
//! and produce `{"categories": [...], "series": [...]}`. Pie charts accept
//! the same shapes and produce `{"categories": [...], "values": [...]}`.
//! Category display names go through the configured rename map.

use crate::input::{Lookup, TenantInput};
use crate::output::Warning;
use crate::slidespec::{as_number, display_string};
use crate::template::{
    ChartConfig, ColumnFormat, ColumnSpec, GenerationMode, PlaceholderDefinition, PlaceholderKind,
    SlideDescriptor, TableConfig, TemplateDescriptor,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Extracted values for every slide of a template, plus what went wrong.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFacts {
    pub slides: Vec<SlideFacts>,
    pub warnings: Vec<Warning>,
}

impl ExtractedFacts {
    pub fn slide(&self, slide_key: &str) -> Option<&SlideFacts> {
        self.slides.iter().find(|s| s.slide_key == slide_key)
    }
}

/// Extracted-mode values of one slide, keyed by token.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideFacts {
    pub slide_no: u32,
    pub slide_key: String,
    pub values: Map<String, Value>,
}

/// Resolve every extracted-mode slot of every slide.
pub fn extract_facts(input: &TenantInput, template: &TemplateDescriptor) -> ExtractedFacts {
    let mut facts = ExtractedFacts::default();
    for slide in &template.slides {
        let (slide_facts, warnings) = extract_slide(input, slide);
        facts.slides.push(slide_facts);
        facts.warnings.extend(warnings);
    }
    debug!(
        "Extracted {} slides for input '{}' ({} warnings)",
        facts.slides.len(),
        input.id(),
        facts.warnings.len()
    );
    facts
}

/// Resolve the extracted-mode slots of one slide.
pub fn extract_slide(input: &TenantInput, slide: &SlideDescriptor) -> (SlideFacts, Vec<Warning>) {
    let mut ctx = Ctx {
        slide_key: &slide.slide_key,
        warnings: Vec::new(),
    };
    let mut values = Map::new();

    for p in &slide.placeholders {
        if p.mode() != GenerationMode::Extracted {
            continue;
        }
        let value = match p.kind {
            PlaceholderKind::Text | PlaceholderKind::Paragraph => ctx.text(input, p),
            PlaceholderKind::BulletList => ctx.list(input, p),
            PlaceholderKind::BarChart | PlaceholderKind::PieChart => ctx.chart(input, p),
            PlaceholderKind::NativeTable => ctx.table(input, p),
        };
        values.insert(p.token.clone(), value);
    }

    (
        SlideFacts {
            slide_no: slide.slide_no,
            slide_key: slide.slide_key.clone(),
            values,
        },
        ctx.warnings,
    )
}

struct Ctx<'a> {
    slide_key: &'a str,
    warnings: Vec<Warning>,
}

impl Ctx<'_> {
    fn warn(&mut self, p: &PlaceholderDefinition, path: &str, detail: impl Into<String>) {
        self.warnings.push(Warning::Extraction {
            slide_key: self.slide_key.to_string(),
            token: p.token.clone(),
            path: path.to_string(),
            detail: detail.into(),
        });
    }

    /// Look up `path`, recording a warning when it is absent.
    fn resolve<'i>(
        &mut self,
        input: &'i TenantInput,
        p: &PlaceholderDefinition,
        path: &str,
    ) -> Option<&'i Value> {
        match input.lookup(path) {
            Lookup::Found(v) => Some(v),
            Lookup::Missing { resolved } => {
                let detail = if resolved.is_empty() {
                    "path not found".to_string()
                } else {
                    format!("path not found (resolved up to '{resolved}')")
                };
                self.warn(p, path, detail);
                None
            }
        }
    }

    // ── Text / paragraph ─────────────────────────────────────────────────

    fn text(&mut self, input: &TenantInput, p: &PlaceholderDefinition) -> Value {
        let fallback = || {
            p.default
                .as_ref()
                .map(|d| text_value(d).unwrap_or_else(|| Value::String(display_string(d))))
                .unwrap_or_else(|| Value::String(String::new()))
        };
        let Some(path) = p.source.as_deref() else {
            return fallback();
        };
        match self.resolve(input, p, path) {
            Some(v) => match text_value(v) {
                Some(t) => t,
                None => {
                    self.warn(p, path, "expected a scalar or list, found an object");
                    fallback()
                }
            },
            None => fallback(),
        }
    }

    // ── Bullet list ──────────────────────────────────────────────────────

    fn list(&mut self, input: &TenantInput, p: &PlaceholderDefinition) -> Value {
        let fallback = || p.default.as_ref().map(list_value).unwrap_or_else(|| json!([]));
        let Some(path) = p.source.as_deref() else {
            return fallback();
        };
        match self.resolve(input, p, path) {
            Some(v @ (Value::Array(_) | Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                list_value(v)
            }
            Some(_) => {
                self.warn(p, path, "expected a list, found an object");
                fallback()
            }
            None => fallback(),
        }
    }

    // ── Charts ───────────────────────────────────────────────────────────

    fn chart(&mut self, input: &TenantInput, p: &PlaceholderDefinition) -> Value {
        let cfg = p.chart_config.clone().unwrap_or_default();
        let value_key = if p.kind == PlaceholderKind::PieChart {
            "values"
        } else {
            "series"
        };
        let empty = json!({"categories": [], value_key: []});

        let Some(path) = cfg.data_source.as_deref().or(p.source.as_deref()) else {
            self.warn(p, "", "chart has no data source");
            return empty;
        };
        let Some(node) = self.resolve(input, p, path) else {
            return empty;
        };
        match chart_series(node, &cfg) {
            Some(series) => {
                if series.categories.is_empty() {
                    self.warn(p, path, "chart source is empty");
                }
                if let Some((labels, values)) = series.mismatch {
                    warn!(
                        token = %p.token,
                        path,
                        labels,
                        values,
                        "chart labels and values differ in length"
                    );
                    let detail = format!("{labels} labels but {values} values; extra entries dropped");
                    self.warn(p, path, detail);
                }
                json!({"categories": series.categories, value_key: series.values})
            }
            None => {
                self.warn(p, path, "unrecognised chart source shape");
                empty
            }
        }
    }

    // ── Tables ───────────────────────────────────────────────────────────

    fn table(&mut self, input: &TenantInput, p: &PlaceholderDefinition) -> Value {
        let Some(cfg) = p.table_config.as_ref() else {
            self.warn(p, "", "table has no table_config");
            return json!({"columns": [], "rows": []});
        };
        let headers: Vec<&str> = cfg.columns.iter().map(|c| c.header.as_str()).collect();
        let empty = json!({"columns": headers, "rows": []});

        let Some(path) = cfg.data_source.as_deref().or(p.source.as_deref()) else {
            self.warn(p, "", "table has no data source");
            return empty;
        };
        let Some(node) = self.resolve(input, p, path) else {
            return empty;
        };
        let Some(records) = node.as_array() else {
            self.warn(p, path, "expected a list of records");
            return empty;
        };
        let rows = table_rows(records, cfg);
        json!({"columns": headers, "rows": rows})
    }
}

/// Scalars pass through, lists are joined with newlines, objects are rejected.
fn text_value(v: &Value) -> Option<Value> {
    match v {
        Value::String(_) | Value::Number(_) => Some(v.clone()),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        Value::Array(items) => Some(Value::String(
            items.iter().map(display_string).collect::<Vec<_>>().join("\n"),
        )),
        Value::Null => Some(Value::String(String::new())),
        Value::Object(_) => None,
    }
}

fn list_value(v: &Value) -> Value {
    match v {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|i| Value::String(display_string(i)))
                .collect(),
        ),
        Value::String(s) => Value::Array(
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| Value::String(l.to_string()))
                .collect(),
        ),
        Value::Null => json!([]),
        other => json!([display_string(other)]),
    }
}

const RECORD_LABEL_KEYS: [&str; 4] = ["label", "category", "name", "key"];
const RECORD_VALUE_KEYS: [&str; 3] = ["value", "count", "total"];

/// Parallel chart vectors read from one data source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub categories: Vec<String>,
    /// JSON numbers as they appeared in the input; numeric strings are parsed.
    pub values: Vec<Value>,
    /// `(labels, values)` lengths when a `{labels, values}` source was uneven.
    pub mismatch: Option<(usize, usize)>,
}

/// Keep numbers untouched; parse numeric strings into the narrowest number.
fn chart_number(v: &Value) -> Option<Value> {
    match v {
        Value::Number(_) => Some(v.clone()),
        other => {
            let n = as_number(other)?;
            if n.fract() == 0.0 && n.abs() < 1e15 {
                Some(Value::from(n as i64))
            } else {
                serde_json::Number::from_f64(n).map(Value::Number)
            }
        }
    }
}

/// Read a chart source into parallel categories and values.
pub fn chart_series(node: &Value, cfg: &ChartConfig) -> Option<ChartSeries> {
    let label_field = cfg.label_field();
    let value_field = cfg.value_field();

    match node {
        Value::Object(obj) => {
            if let (Some(Value::Array(labels)), Some(Value::Array(values))) =
                (obj.get(label_field), obj.get(value_field))
            {
                let lens = (labels.len(), values.len());
                let n = lens.0.min(lens.1);
                let categories = labels[..n]
                    .iter()
                    .map(|l| cfg.display_name(&display_string(l)).to_string())
                    .collect();
                let values = values[..n]
                    .iter()
                    .map(|v| chart_number(v).unwrap_or_else(|| Value::from(0)))
                    .collect();
                return Some(ChartSeries {
                    categories,
                    values,
                    mismatch: (lens.0 != lens.1).then_some(lens),
                });
            }
            // category → value
            let mut categories = Vec::with_capacity(obj.len());
            let mut values = Vec::with_capacity(obj.len());
            for (k, v) in obj {
                let n = chart_number(v)?;
                categories.push(cfg.display_name(k).to_string());
                values.push(n);
            }
            Some(ChartSeries {
                categories,
                values,
                mismatch: None,
            })
        }
        Value::Array(records) => {
            let mut categories = Vec::with_capacity(records.len());
            let mut values = Vec::with_capacity(records.len());
            for r in records {
                let obj = r.as_object()?;
                let label = std::iter::once(label_field)
                    .chain(RECORD_LABEL_KEYS)
                    .find_map(|k| obj.get(k))?;
                let value = std::iter::once(value_field)
                    .chain(RECORD_VALUE_KEYS)
                    .find_map(|k| obj.get(k).and_then(chart_number))?;
                categories.push(cfg.display_name(&display_string(label)).to_string());
                values.push(value);
            }
            Some(ChartSeries {
                categories,
                values,
                mismatch: None,
            })
        }
        _ => None,
    }
}

/// Project and format the first `max_rows` records.
pub fn table_rows(records: &[Value], cfg: &TableConfig) -> Vec<Vec<String>> {
    records
        .iter()
        .take(cfg.max_rows)
        .map(|record| {
            cfg.columns
                .iter()
                .map(|col| {
                    let cell = record.get(&col.field).unwrap_or(&Value::Null);
                    format_cell(cell, col)
                })
                .collect()
        })
        .collect()
}

/// Apply a column's formatting rule to one cell.
pub fn format_cell(cell: &Value, col: &ColumnSpec) -> String {
    match col.format {
        ColumnFormat::Plain => display_string(cell),
        ColumnFormat::Upper => display_string(cell).to_uppercase(),
        ColumnFormat::Percent => match as_number(cell) {
            Some(f) => format!("{:.*}%", col.decimals.unwrap_or(1), f * 100.0),
            None => display_string(cell),
        },
        ColumnFormat::Number => match as_number(cell) {
            Some(f) => format!("{:.*}", col.decimals.unwrap_or(0), f),
            None => display_string(cell),
        },
    }
}
