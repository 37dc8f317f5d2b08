//! Where templates and tenant inputs come from.
//!
//! The pipeline only needs three lookups, expressed by [`CatalogStore`].
//! [`DirectoryCatalog`] serves them from two directories on disk;
//! [`MemoryCatalog`] serves them from memory for embedding and tests.
//!
//! ## Directory layout
//!
//! ```text
//! templates/
//!   catalog.json          {"templates": [{"template_id", "descriptor_file", "pptx_file"}]}
//!   executive.json        descriptor (used when catalog.json has no entry)
//!   executive.pptx        document (descriptor "document" field, else <id>.pptx)
//! inputs/
//!   catalog.json          {"datasets": [{"id", "file"}]}
//!   acme.json             tenant input (used when catalog.json has no entry)
//! ```

use crate::error::ReportError;
use crate::input::TenantInput;
use crate::template::TemplateDescriptor;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub trait CatalogStore: Send + Sync {
    fn load_template<'a>(
        &'a self,
        template_id: &'a str,
    ) -> BoxFuture<'a, Result<TemplateDescriptor, ReportError>>;

    fn load_input<'a>(&'a self, input_id: &'a str) -> BoxFuture<'a, Result<TenantInput, ReportError>>;

    /// Path of the PPTX document the template describes.
    fn template_document<'a>(
        &'a self,
        template_id: &'a str,
    ) -> BoxFuture<'a, Result<PathBuf, ReportError>>;
}

// ── Directory catalog ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TemplateIndex {
    #[serde(default)]
    templates: Vec<TemplateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TemplateEntry {
    template_id: String,
    descriptor_file: String,
    #[serde(default)]
    pptx_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InputIndex {
    #[serde(default)]
    datasets: Vec<InputEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct InputEntry {
    id: String,
    file: String,
}

/// Templates and inputs read from two directories.
///
/// Descriptors are parsed once and cached; inputs are re-read on every call
/// so an operator can replace a dataset without restarting.
pub struct DirectoryCatalog {
    templates_dir: PathBuf,
    inputs_dir: PathBuf,
    descriptors: Mutex<HashMap<String, TemplateDescriptor>>,
}

impl DirectoryCatalog {
    pub fn new(templates_dir: impl Into<PathBuf>, inputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            inputs_dir: inputs_dir.into(),
            descriptors: Mutex::new(HashMap::new()),
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    pub fn inputs_dir(&self) -> &Path {
        &self.inputs_dir
    }

    async fn template_entry(&self, template_id: &str) -> Result<Option<TemplateEntry>, ReportError> {
        let path = self.templates_dir.join("catalog.json");
        let Some(index) = read_json::<TemplateIndex>(&path).await? else {
            return Ok(None);
        };
        Ok(index
            .templates
            .into_iter()
            .find(|t| t.template_id == template_id))
    }

    async fn descriptor_path(&self, template_id: &str) -> Result<PathBuf, ReportError> {
        Ok(match self.template_entry(template_id).await? {
            Some(entry) => self.templates_dir.join(entry.descriptor_file),
            None => self.templates_dir.join(format!("{template_id}.json")),
        })
    }

    async fn read_template(&self, template_id: &str) -> Result<TemplateDescriptor, ReportError> {
        let path = self.descriptor_path(template_id).await?;
        let mut descriptor: TemplateDescriptor = read_json(&path)
            .await?
            .ok_or_else(|| ReportError::TemplateNotFound {
                template_id: template_id.to_string(),
            })?;
        descriptor.normalize()?;
        debug!(
            "Loaded template '{}' ({} slides) from {}",
            template_id,
            descriptor.slides.len(),
            path.display()
        );
        Ok(descriptor)
    }

    async fn read_input(&self, input_id: &str) -> Result<TenantInput, ReportError> {
        let index_path = self.inputs_dir.join("catalog.json");
        let file = read_json::<InputIndex>(&index_path)
            .await?
            .and_then(|index| index.datasets.into_iter().find(|d| d.id == input_id))
            .map(|entry| entry.file)
            .unwrap_or_else(|| format!("{input_id}.json"));
        let path = self.inputs_dir.join(file);
        let raw: Value = read_json(&path)
            .await?
            .ok_or_else(|| ReportError::InputNotFound {
                input_id: input_id.to_string(),
            })?;
        Ok(TenantInput::new(input_id, raw))
    }

    async fn document_path(&self, template_id: &str) -> Result<PathBuf, ReportError> {
        if let Some(file) = self
            .template_entry(template_id)
            .await?
            .and_then(|e| e.pptx_file)
        {
            return Ok(self.templates_dir.join(file));
        }
        let descriptor = self.read_cached(template_id).await?;
        let file = descriptor
            .document
            .clone()
            .unwrap_or_else(|| format!("{template_id}.pptx"));
        Ok(self.templates_dir.join(file))
    }

    async fn read_cached(&self, template_id: &str) -> Result<TemplateDescriptor, ReportError> {
        if let Some(hit) = self
            .descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(template_id)
        {
            return Ok(hit.clone());
        }
        let descriptor = self.read_template(template_id).await?;
        self.descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(template_id.to_string(), descriptor.clone());
        Ok(descriptor)
    }
}

impl CatalogStore for DirectoryCatalog {
    fn load_template<'a>(
        &'a self,
        template_id: &'a str,
    ) -> BoxFuture<'a, Result<TemplateDescriptor, ReportError>> {
        Box::pin(self.read_cached(template_id))
    }

    fn load_input<'a>(&'a self, input_id: &'a str) -> BoxFuture<'a, Result<TenantInput, ReportError>> {
        Box::pin(self.read_input(input_id))
    }

    fn template_document<'a>(
        &'a self,
        template_id: &'a str,
    ) -> BoxFuture<'a, Result<PathBuf, ReportError>> {
        Box::pin(self.document_path(template_id))
    }
}

/// Parse a JSON file; `Ok(None)` when it does not exist.
async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ReportError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ReportError::CatalogParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ReportError::CatalogParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

// ── In-memory catalog ────────────────────────────────────────────────────

/// A catalog held entirely in memory.
#[derive(Default)]
pub struct MemoryCatalog {
    templates: HashMap<String, (TemplateDescriptor, PathBuf)>,
    inputs: HashMap<String, Value>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template and the document it describes.
    pub fn with_template(
        mut self,
        descriptor: TemplateDescriptor,
        document: impl Into<PathBuf>,
    ) -> Self {
        self.templates.insert(
            descriptor.template_id.clone(),
            (descriptor, document.into()),
        );
        self
    }

    pub fn with_input(mut self, input_id: impl Into<String>, raw: Value) -> Self {
        self.inputs.insert(input_id.into(), raw);
        self
    }

    fn entry(&self, template_id: &str) -> Result<&(TemplateDescriptor, PathBuf), ReportError> {
        self.templates
            .get(template_id)
            .ok_or_else(|| ReportError::TemplateNotFound {
                template_id: template_id.to_string(),
            })
    }
}

impl CatalogStore for MemoryCatalog {
    fn load_template<'a>(
        &'a self,
        template_id: &'a str,
    ) -> BoxFuture<'a, Result<TemplateDescriptor, ReportError>> {
        let result = self.entry(template_id).map(|(d, _)| d.clone());
        Box::pin(async move { result })
    }

    fn load_input<'a>(&'a self, input_id: &'a str) -> BoxFuture<'a, Result<TenantInput, ReportError>> {
        let result = self
            .inputs
            .get(input_id)
            .map(|raw| TenantInput::new(input_id, raw.clone()))
            .ok_or_else(|| ReportError::InputNotFound {
                input_id: input_id.to_string(),
            });
        Box::pin(async move { result })
    }

    fn template_document<'a>(
        &'a self,
        template_id: &'a str,
    ) -> BoxFuture<'a, Result<PathBuf, ReportError>> {
        let result = self.entry(template_id).map(|(_, p)| p.clone());
        Box::pin(async move { result })
    }
}
