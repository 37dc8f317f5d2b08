//! Template descriptors: which slides exist and which slots each one fills.
//!
//! A descriptor is loaded once from JSON and is immutable afterwards. On
//! load the slides are sorted by slide number and every slide is checked for
//! duplicate tokens, because the slot map is keyed by token and a duplicate
//! would silently drop one definition.

use crate::error::ReportError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One English Metric Unit per inch, as used by DrawingML.
pub const EMU_PER_INCH: f64 = 914_400.0;

/// Declared slot layout for one PPTX template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub template_id: String,
    #[serde(default)]
    pub name: String,
    /// File name of the PPTX this descriptor describes, relative to the
    /// catalog's template directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub slides: Vec<SlideDescriptor>,
}

impl TemplateDescriptor {
    /// Parse a descriptor from JSON, sort its slides and validate it.
    pub fn from_json(text: &str) -> Result<Self, ReportError> {
        let mut descriptor: TemplateDescriptor =
            serde_json::from_str(text).map_err(|e| ReportError::InvalidTemplate {
                template_id: "<unparsed>".into(),
                detail: e.to_string(),
            })?;
        descriptor.normalize()?;
        Ok(descriptor)
    }

    /// Sort slides by slide number and reject duplicate tokens or slide keys.
    pub fn normalize(&mut self) -> Result<(), ReportError> {
        self.slides.sort_by_key(|s| s.slide_no);

        let mut keys = HashSet::new();
        for slide in &self.slides {
            if !keys.insert(slide.slide_key.as_str()) {
                return Err(self.invalid(format!("duplicate slide key '{}'", slide.slide_key)));
            }
            let mut tokens = HashSet::new();
            for p in &slide.placeholders {
                if !tokens.insert(p.token.as_str()) {
                    return Err(self.invalid(format!(
                        "token '{}' declared twice on slide '{}'",
                        p.token, slide.slide_key
                    )));
                }
                if p.ai_generate && !p.kind.is_textual() {
                    return Err(self.invalid(format!(
                        "token '{}' on slide '{}': only text, paragraph and bullet_list slots can be AI-generated",
                        p.token, slide.slide_key
                    )));
                }
                if p.mode() == GenerationMode::Extracted
                    && p.source.is_none()
                    && p.default.is_none()
                    && p.chart_config.is_none()
                    && p.table_config.is_none()
                {
                    return Err(self.invalid(format!(
                        "extracted token '{}' on slide '{}' has neither a source nor a default",
                        p.token, slide.slide_key
                    )));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, detail: String) -> ReportError {
        ReportError::InvalidTemplate {
            template_id: self.template_id.clone(),
            detail,
        }
    }

    pub fn slide(&self, slide_key: &str) -> Option<&SlideDescriptor> {
        self.slides.iter().find(|s| s.slide_key == slide_key)
    }

    /// Audience used for recorded-response file naming.
    pub fn audience(&self) -> &'static str {
        audience_for(&self.template_id)
    }
}

/// `management` for executive-facing templates, `technical` otherwise.
pub fn audience_for(template_id: &str) -> &'static str {
    let id = template_id.to_ascii_lowercase();
    if id.contains("management") || id.contains("executive") {
        "management"
    } else {
        "technical"
    }
}

/// One slide of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideDescriptor {
    pub slide_no: u32,
    pub slide_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub placeholders: Vec<PlaceholderDefinition>,
}

impl SlideDescriptor {
    pub fn placeholder(&self, token: &str) -> Option<&PlaceholderDefinition> {
        self.placeholders.iter().find(|p| p.token == token)
    }

    pub fn ai_placeholders(&self) -> impl Iterator<Item = &PlaceholderDefinition> {
        self.placeholders
            .iter()
            .filter(|p| p.mode() == GenerationMode::AiGenerated)
    }

    pub fn has_ai_slots(&self) -> bool {
        self.ai_placeholders().next().is_some()
    }
}

/// A single token slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderDefinition {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: PlaceholderKind,
    #[serde(default)]
    pub ai_generate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_instruction: Option<String>,
    /// Extracted tokens grounding this AI value: `TOKEN` on the same slide
    /// or `slide_key.TOKEN` elsewhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fact_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_config: Option<ChartConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_config: Option<TableConfig>,
}

impl PlaceholderDefinition {
    pub fn mode(&self) -> GenerationMode {
        if self.ai_generate {
            GenerationMode::AiGenerated
        } else {
            GenerationMode::Extracted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Extracted,
    AiGenerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    Text,
    Paragraph,
    #[serde(alias = "bullet-list", alias = "list")]
    BulletList,
    #[serde(alias = "bar-chart")]
    BarChart,
    #[serde(alias = "pie-chart")]
    PieChart,
    #[serde(alias = "native-table", alias = "table")]
    NativeTable,
}

impl PlaceholderKind {
    pub fn is_chart(self) -> bool {
        matches!(self, Self::BarChart | Self::PieChart)
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Paragraph | Self::BulletList)
    }
}

/// Placement of a drawn object on the slide, in inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            left: 0.5,
            top: 1.5,
            width: 9.0,
            height: 4.5,
        }
    }
}

impl Frame {
    /// `(x, y, cx, cy)` in EMU.
    pub fn to_emu(&self) -> (i64, i64, i64, i64) {
        let emu = |inches: f64| (inches * EMU_PER_INCH).round() as i64;
        (emu(self.left), emu(self.top), emu(self.width), emu(self.height))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    /// Key of the label array in a `{labels, values}` source. Default: `labels`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_field: Option<String>,
    /// Key of the value array (or the value field of record lists). Default: `values`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_field: Option<String>,
    /// Raw category → display name, e.g. `high` → `High`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_names: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub position: Frame,
}

impl ChartConfig {
    pub fn label_field(&self) -> &str {
        self.label_field.as_deref().unwrap_or("labels")
    }

    pub fn value_field(&self) -> &str {
        self.value_field.as_deref().unwrap_or("values")
    }

    pub fn display_name<'a>(&'a self, raw: &'a str) -> &'a str {
        self.category_names.get(raw).map(String::as_str).unwrap_or(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default)]
    pub position: Frame,
    /// Header fill as `RRGGBB`. Default: `1E40AF`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_fill: Option<String>,
}

fn default_max_rows() -> usize {
    10
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            data_source: None,
            columns: Vec::new(),
            max_rows: default_max_rows(),
            position: Frame::default(),
            header_fill: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub field: String,
    pub header: String,
    #[serde(default)]
    pub format: ColumnFormat,
    /// Digits after the decimal point for `percent` and `number`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<usize>,
    /// Column width in inches; columns without one share the remainder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnFormat {
    #[default]
    Plain,
    Percent,
    Number,
    Upper,
}
