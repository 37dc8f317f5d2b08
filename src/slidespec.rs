//! The resolved slot map for one job.
//!
//! A [`SlideSpec`] mirrors its template: one [`SlideContent`] per declared
//! slide, in slide order, each mapping token → resolved value. Values are
//! plain JSON so a spec round-trips through job records and recorded
//! responses unchanged:
//!
//! | Kind | Value |
//! |------|-------|
//! | text, paragraph | string |
//! | bullet_list | array of strings |
//! | bar_chart | `{"categories": [..], "series": [..]}` |
//! | pie_chart | `{"categories": [..], "values": [..]}` |
//! | native_table | `{"columns": [..], "rows": [[..], ..]}` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideSpec {
    pub template_id: String,
    pub slides: Vec<SlideContent>,
}

impl SlideSpec {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            slides: Vec::new(),
        }
    }

    pub fn slide(&self, slide_key: &str) -> Option<&SlideContent> {
        self.slides.iter().find(|s| s.slide_key == slide_key)
    }

    pub fn slide_mut(&mut self, slide_key: &str) -> Option<&mut SlideContent> {
        self.slides.iter_mut().find(|s| s.slide_key == slide_key)
    }

    /// Replace the slide with the same key, or insert it keeping slide order.
    pub fn upsert(&mut self, content: SlideContent) {
        if let Some(existing) = self.slide_mut(&content.slide_key) {
            *existing = content;
            return;
        }
        let at = self
            .slides
            .iter()
            .position(|s| s.slide_no > content.slide_no)
            .unwrap_or(self.slides.len());
        self.slides.insert(at, content);
    }

    pub fn get(&self, slide_key: &str, token: &str) -> Option<&Value> {
        self.slide(slide_key).and_then(|s| s.placeholders.get(token))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideContent {
    pub slide_no: u32,
    pub slide_key: String,
    #[serde(default)]
    pub placeholders: Map<String, Value>,
}

impl SlideContent {
    pub fn new(slide_no: u32, slide_key: impl Into<String>) -> Self {
        Self {
            slide_no,
            slide_key: slide_key.into(),
            placeholders: Map::new(),
        }
    }

    pub fn set(&mut self, token: impl Into<String>, value: Value) {
        self.placeholders.insert(token.into(), value);
    }
}

// ── Typed payload views ──────────────────────────────────────────────────

/// Chart payload as the renderer consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPayload {
    pub categories: Vec<String>,
    pub values: Vec<f64>,
}

impl ChartPayload {
    /// Read `{categories, series}` or `{categories, values}`. Numeric
    /// strings are accepted; the two arrays are truncated to equal length.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let categories: Vec<String> = obj
            .get("categories")?
            .as_array()?
            .iter()
            .map(display_string)
            .collect();
        let values: Vec<f64> = obj
            .get("series")
            .or_else(|| obj.get("values"))?
            .as_array()?
            .iter()
            .map(|v| as_number(v).unwrap_or(0.0))
            .collect();
        let n = categories.len().min(values.len());
        Some(Self {
            categories: categories.into_iter().take(n).collect(),
            values: values.into_iter().take(n).collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Table payload as the renderer consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TablePayload {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let columns = obj
            .get("columns")?
            .as_array()?
            .iter()
            .map(display_string)
            .collect();
        let rows = obj
            .get("rows")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_array)
                    .map(|cells| cells.iter().map(display_string).collect())
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { columns, rows })
    }
}

/// Text form of a scalar: strings as-is, numbers without a trailing `.0`,
/// null as empty.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Numeric view of a JSON scalar. Strings like `"1,234"` or `"12.5%"` parse
/// after stripping separators and the percent sign.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '%')
                .collect();
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}
