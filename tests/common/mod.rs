//! Shared fixtures for the integration tests: a three-slide security
//! template, its PPTX document, a tenant input, an echoing generation
//! backend and fake preview converters.

#![allow(dead_code)]

use futures::future::BoxFuture;
use reportdeck::preview::{DocumentConverter, Rasterizer};
use reportdeck::{
    ContentGenerator, GenerationBackend, GenerationConfig, GenerationError, GenerationRequest,
    MemoryAuditSink, MemoryCatalog, NoopProgressCallback, PipelineConfig, PreviewPipeline,
    ReportService, StageError, TemplateDescriptor,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const TEMPLATE_ID: &str = "security_review";
pub const INPUT_ID: &str = "acme";

pub fn job_id() -> String {
    format!("{INPUT_ID}:{TEMPLATE_ID}")
}

// ── Template and input ───────────────────────────────────────────────────

pub fn descriptor_json() -> Value {
    json!({
        "template_id": TEMPLATE_ID,
        "name": "Security review",
        "slides": [
            {"slide_no": 3, "slide_key": "incidents", "title": "Incidents", "placeholders": [
                {"token": "INCIDENTS", "type": "native_table", "table_config": {
                    "data_source": "incidents",
                    "max_rows": 5,
                    "columns": [
                        {"field": "id", "header": "ID", "format": "upper"},
                        {"field": "title", "header": "Title"},
                        {"field": "resolved", "header": "Resolved", "format": "percent", "decimals": 0}
                    ]
                }},
                {"token": "NEXT_STEPS", "type": "paragraph", "ai_generate": true,
                 "ai_instruction": "Recommend next steps."}
            ]},
            {"slide_no": 1, "slide_key": "overview", "title": "Overview", "placeholders": [
                {"token": "TENANT", "type": "text", "source": "tenant.name"},
                {"token": "ALERT_TOTAL", "type": "text", "source": "alerts.total"},
                {"token": "SUMMARY", "type": "paragraph", "ai_generate": true,
                 "ai_instruction": "Summarise the alert volume.", "fact_refs": ["ALERT_TOTAL"]}
            ]},
            {"slide_no": 2, "slide_key": "alerts", "title": "Alerts", "placeholders": [
                {"token": "TREND", "type": "bar_chart", "chart_config": {
                    "data_source": "alerts.trend_weekly",
                    "title": "Weekly alerts"
                }},
                {"token": "RISKS", "type": "bullet_list", "ai_generate": true,
                 "ai_instruction": "List the key risks."}
            ]}
        ]
    })
}

pub fn descriptor() -> TemplateDescriptor {
    TemplateDescriptor::from_json(&descriptor_json().to_string()).unwrap()
}

pub fn tenant_input() -> Value {
    let incidents: Vec<Value> = (1..=8)
        .map(|i| json!({"id": format!("inc-{i}"), "title": format!("Incident {i}"), "resolved": 0.5}))
        .collect();
    json!({
        "tenant": {"name": "Acme Corp"},
        "alerts": {
            "total": 1234,
            "trend_weekly": {"labels": ["W1", "W2", "W3", "W4"], "values": [10, 15, 9, 20]}
        },
        "incidents": incidents
    })
}

// ── PPTX document ────────────────────────────────────────────────────────

const SLIDE_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr/>"#;
const SLIDE_TAIL: &str = "</p:spTree></p:cSld></p:sld>";

fn text_box(paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|t| format!(r#"<a:p><a:r><a:rPr lang="en-US"/><a:t>{t}</a:t></a:r></a:p>"#))
        .collect();
    format!(
        r#"<p:sp><p:nvSpPr><p:cNvPr id="2" name="Body"/><p:cNvSpPr txBox="1"/><p:nvPr/></p:nvSpPr><p:spPr/><p:txBody><a:bodyPr/><a:lstStyle/>{body}</p:txBody></p:sp>"#
    )
}

/// Three slides holding the template's markers, in presentation order.
pub fn document_bytes() -> Vec<u8> {
    let slides = [
        text_box(&["{{TENANT}}", "Alerts this month: {{ALERT_TOTAL}}", "{{SUMMARY}}"]),
        text_box(&["{{TREND}}", "{{RISKS}}"]),
        text_box(&["{{INCIDENTS}}", "{{NEXT_STEPS}}"]),
    ];
    let mut sld_ids = String::new();
    let mut rels = String::new();
    let mut overrides = String::new();
    for i in 1..=slides.len() {
        sld_ids.push_str(&format!(r#"<p:sldId id="{}" r:id="rId{i}"/>"#, 255 + i));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{i}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide{i}.xml"/>"#
        ));
        overrides.push_str(&format!(
            r#"<Override PartName="/ppt/slides/slide{i}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#
        ));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut add = |name: &str, data: String| {
        writer.start_file(name, options).unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    };
    add(
        "[Content_Types].xml",
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/>{overrides}</Types>"#
        ),
    );
    add(
        "ppt/presentation.xml",
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldIdLst>{sld_ids}</p:sldIdLst><p:sldSz cx="9144000" cy="6858000"/></p:presentation>"#
        ),
    );
    add(
        "ppt/_rels/presentation.xml.rels",
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
        ),
    );
    for (i, body) in slides.iter().enumerate() {
        add(
            &format!("ppt/slides/slide{}.xml", i + 1),
            format!("{SLIDE_HEAD}{body}{SLIDE_TAIL}"),
        );
    }
    writer.finish().unwrap().into_inner()
}

/// Read one part of a rendered deck as text.
pub fn read_part(deck: &Path, name: &str) -> Option<String> {
    let bytes = std::fs::read(deck).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).ok()?;
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    Some(text)
}

// ── Generation backend ───────────────────────────────────────────────────

/// Call number as letters (`a`, `b`, ..., `aa`), so generated text carries
/// no digits for the fact-check to flag.
fn tag(call: u32) -> String {
    let mut n = call;
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Answers every request for exactly the slides it names.
///
/// Values come from `answers` (token → value) when present; otherwise a
/// string tagged with the call number, so each call produces new content.
pub struct EchoBackend {
    answers: Mutex<HashMap<String, Value>>,
    failures: Mutex<Vec<GenerationError>>,
    calls: AtomicU32,
    requests: Mutex<Vec<String>>,
}

impl EchoBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn answer(&self, token: &str, value: Value) {
        self.answers.lock().unwrap().insert(token.to_string(), value);
    }

    /// Fail the next calls with these errors, in order.
    pub fn fail_with(&self, errors: Vec<GenerationError>) {
        *self.failures.lock().unwrap() = errors;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, user: &str, call: u32) -> String {
        let start = user.find('{').unwrap_or(0);
        let body: Value = serde_json::from_str(&user[start..]).unwrap_or(Value::Null);
        let answers = self.answers.lock().unwrap();
        let slides: Vec<Value> = body["slides"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|slide| {
                let mut placeholders = Map::new();
                for t in slide["tokens"].as_array().cloned().unwrap_or_default() {
                    let token = t["token"].as_str().unwrap_or_default().to_string();
                    let value = answers.get(&token).cloned().unwrap_or_else(|| {
                        if t["type"] == "bullet_list" {
                            json!([format!("{token} point A, take {}", tag(call)), format!("{token} point B")])
                        } else {
                            json!(format!("{token} written live, take {}", tag(call)))
                        }
                    });
                    placeholders.insert(token, value);
                }
                json!({"slide_key": slide["slide_key"], "placeholders": placeholders})
            })
            .collect();
        json!({ "slides": slides }).to_string()
    }
}

impl GenerationBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn complete<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, GenerationError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.user.clone());
        let failure = {
            let mut failures = self.failures.lock().unwrap();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        let result = match failure {
            Some(e) => Err(e),
            None => Ok(self.respond(&request.user, call)),
        };
        Box::pin(async move { result })
    }
}

// ── Preview fakes ────────────────────────────────────────────────────────

/// Copies the deck to `<stem>.pdf`.
pub struct CopyConverter {
    pub calls: AtomicU32,
}

impl DocumentConverter for CopyConverter {
    fn name(&self) -> &str {
        "copy"
    }

    fn to_pdf<'a>(
        &'a self,
        input: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, StageError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stem = input.file_stem().unwrap_or_default().to_string_lossy().into_owned();
            let pdf = out_dir.join(format!("{stem}.pdf"));
            tokio::fs::copy(input, &pdf).await.map_err(|e| StageError::Failed {
                converter: "copy".into(),
                detail: e.to_string(),
            })?;
            Ok(pdf)
        })
    }
}

/// Writes `pages` numbered PNG placeholders, or reports itself missing.
pub struct FakeRasterizer {
    pub name: &'static str,
    pub pages: usize,
    pub available: bool,
}

impl Rasterizer for FakeRasterizer {
    fn name(&self) -> &str {
        self.name
    }

    fn rasterize<'a>(
        &'a self,
        _pdf: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<PathBuf>, StageError>> {
        Box::pin(async move {
            if !self.available {
                return Err(StageError::Unavailable {
                    converter: self.name.into(),
                    detail: "not installed".into(),
                });
            }
            tokio::fs::create_dir_all(out_dir).await.unwrap();
            let mut pages = Vec::new();
            for i in 1..=self.pages {
                let page = out_dir.join(format!("page-{i:03}.png"));
                tokio::fs::write(&page, format!("page {i}")).await.unwrap();
                pages.push(page);
            }
            Ok(pages)
        })
    }
}

// ── Service harness ──────────────────────────────────────────────────────

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub service: ReportService,
    pub audit: Arc<MemoryAuditSink>,
    pub converter: Arc<CopyConverter>,
}

pub struct HarnessOptions {
    pub backend: Option<Arc<dyn GenerationBackend>>,
    pub recorded: Option<Value>,
    pub pdfium_available: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            backend: None,
            recorded: None,
            pdfium_available: true,
        }
    }
}

/// A service over a temp directory with an in-memory catalog.
pub fn harness(options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let document = dir.path().join("security_review.pptx");
    std::fs::write(&document, document_bytes()).unwrap();

    let recorded_dir = dir.path().join("recorded");
    std::fs::create_dir_all(&recorded_dir).unwrap();
    if let Some(spec) = &options.recorded {
        std::fs::write(
            recorded_dir.join(format!("{INPUT_ID}_technical_mock_slidespec.json")),
            serde_json::to_vec(spec).unwrap(),
        )
        .unwrap();
    }

    let config = PipelineConfig::builder()
        .output_dir(dir.path().join("outputs"))
        .enable_generation(options.backend.is_some())
        .recorded_dir(&recorded_dir)
        .retry_backoff_ms(1)
        .max_backoff_ms(5)
        .build()
        .unwrap();
    let generation: &GenerationConfig = &config.generation;
    let generator = ContentGenerator::with_backend(
        options.backend.clone(),
        generation,
        Arc::new(NoopProgressCallback),
    );

    let converter = Arc::new(CopyConverter {
        calls: AtomicU32::new(0),
    });
    let preview = PreviewPipeline::new(
        config.preview_cache_dir(),
        vec![converter.clone() as Arc<dyn DocumentConverter>],
        vec![
            Arc::new(FakeRasterizer {
                name: "pdfium",
                pages: 3,
                available: options.pdfium_available,
            }) as Arc<dyn Rasterizer>,
            Arc::new(FakeRasterizer {
                name: "pdftoppm",
                pages: 3,
                available: true,
            }),
        ],
        2,
    );

    let catalog = MemoryCatalog::new()
        .with_template(descriptor(), &document)
        .with_input(INPUT_ID, tenant_input());
    let audit = Arc::new(MemoryAuditSink::default());
    let service = ReportService::new(config, Arc::new(catalog), audit.clone())
        .with_generator(generator)
        .with_preview(preview);

    Harness {
        dir,
        service,
        audit,
        converter,
    }
}
