//! Concrete preview stages.
//!
//! * [`OfficeConverter`]: PPTX → PDF via headless LibreOffice.
//! * [`PdfiumRasterizer`]: PDF → PNG via pdfium, first choice.
//! * [`PopplerRasterizer`]: PDF → PNG via poppler's `pdftoppm`, second choice.
//!
//! ## Why spawn_blocking for pdfium?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state and must not run on a Tokio worker thread.
//! `spawn_blocking` moves rendering onto the blocking pool.
//!
//! ## Why cap pixels, not DPI?
//!
//! Slide pages are all the same physical size, but a preview is viewed on a
//! screen. `max_rendered_pixels` caps the longest edge so a 16:9 deck and an
//! A4 handout produce thumbnails of comparable size.

use crate::config::PreviewConfig;
use crate::error::StageError;
use futures::future::BoxFuture;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Converts an office document to PDF.
pub trait DocumentConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Write a PDF of `input` into `out_dir` and return its path.
    fn to_pdf<'a>(
        &'a self,
        input: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, StageError>>;
}

/// Renders PDF pages to images.
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;

    /// Write one PNG per page into `out_dir`, returned in page order.
    fn rasterize<'a>(
        &'a self,
        pdf: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<PathBuf>, StageError>>;
}

// ── Process helper ───────────────────────────────────────────────────────

/// Run `cmd` to completion under a wall-clock timeout. On timeout the child
/// is killed (`kill_on_drop`) and the stage reports [`StageError::TimedOut`].
pub async fn run_tool(
    converter: &str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<Output, StageError> {
    cmd.kill_on_drop(true)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let child = cmd.spawn().map_err(|e| StageError::Unavailable {
        converter: converter.to_string(),
        detail: e.to_string(),
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| StageError::Failed {
            converter: converter.to_string(),
            detail: e.to_string(),
        })?,
        Err(_) => {
            return Err(StageError::TimedOut {
                converter: converter.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.trim().lines().last().unwrap_or("").chars().take(200).collect();
        return Err(StageError::Failed {
            converter: converter.to_string(),
            detail: format!("exit {}: {}", output.status, tail),
        });
    }
    Ok(output)
}

// ── LibreOffice ──────────────────────────────────────────────────────────

pub struct OfficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl OfficeConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(
            &config.soffice_path,
            Duration::from_secs(config.converter_timeout_secs),
        )
    }
}

impl DocumentConverter for OfficeConverter {
    fn name(&self) -> &str {
        "soffice"
    }

    fn to_pdf<'a>(
        &'a self,
        input: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, StageError>> {
        Box::pin(async move {
            // A private profile lets conversions of different jobs run at once.
            let profile = out_dir.join(".lo-profile");
            let mut cmd = Command::new(&self.binary);
            cmd.arg(format!("-env:UserInstallation=file://{}", profile.display()))
                .args(["--headless", "--convert-to", "pdf", "--outdir"])
                .arg(out_dir)
                .arg(input);
            debug!("Running {:?}", cmd.as_std());
            run_tool(self.name(), cmd, self.timeout).await?;

            let mut name = input.file_stem().unwrap_or_default().to_os_string();
            name.push(".pdf");
            let pdf = out_dir.join(name);
            if !pdf.exists() {
                return Err(StageError::Failed {
                    converter: self.name().to_string(),
                    detail: format!("no PDF produced at {}", pdf.display()),
                });
            }
            let _ = tokio::fs::remove_dir_all(&profile).await;
            Ok(pdf)
        })
    }
}

// ── pdfium ───────────────────────────────────────────────────────────────

pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(library: Option<PathBuf>, max_pixels: u32) -> Self {
        Self {
            library,
            max_pixels,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(config.pdfium_library.clone(), config.max_rendered_pixels)
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn name(&self) -> &str {
        "pdfium"
    }

    fn rasterize<'a>(
        &'a self,
        pdf: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<PathBuf>, StageError>> {
        let library = self.library.clone();
        let max_pixels = self.max_pixels;
        let pdf = pdf.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                render_blocking(library.as_deref(), max_pixels, &pdf, &out_dir)
            })
            .await
            .map_err(|e| StageError::Failed {
                converter: "pdfium".into(),
                detail: format!("render task panicked: {e}"),
            })?
        })
    }
}

fn render_blocking(
    library: Option<&Path>,
    max_pixels: u32,
    pdf: &Path,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, StageError> {
    let failed = |detail: String| StageError::Failed {
        converter: "pdfium".into(),
        detail,
    };

    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| StageError::Unavailable {
        converter: "pdfium".into(),
        detail: format!("{e:?}"),
    })?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_file(pdf, None)
        .map_err(|e| failed(format!("cannot open {}: {e:?}", pdf.display())))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    std::fs::create_dir_all(out_dir).map_err(|e| failed(e.to_string()))?;
    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("page {}: {e:?}", idx + 1)))?;
        let image = bitmap.as_image();
        let path = out_dir.join(format!("page-{:03}.png", idx + 1));
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| failed(format!("page {}: {e}", idx + 1)))?;
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
        pages.push(path);
    }
    if pages.is_empty() {
        return Err(failed("document has no pages".into()));
    }
    info!("pdfium rendered {} page(s)", pages.len());
    Ok(pages)
}

// ── poppler ──────────────────────────────────────────────────────────────

pub struct PopplerRasterizer {
    binary: PathBuf,
    dpi: u32,
    timeout: Duration,
}

impl PopplerRasterizer {
    pub fn new(binary: impl Into<PathBuf>, dpi: u32, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            dpi,
            timeout,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(
            &config.pdftoppm_path,
            config.dpi,
            Duration::from_secs(config.converter_timeout_secs),
        )
    }
}

impl Rasterizer for PopplerRasterizer {
    fn name(&self) -> &str {
        "pdftoppm"
    }

    fn rasterize<'a>(
        &'a self,
        pdf: &'a Path,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<PathBuf>, StageError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(out_dir)
                .await
                .map_err(|e| StageError::Failed {
                    converter: self.name().to_string(),
                    detail: e.to_string(),
                })?;
            let mut cmd = Command::new(&self.binary);
            cmd.args(["-png", "-r", &self.dpi.to_string()])
                .arg(pdf)
                .arg(out_dir.join("page"));
            run_tool(self.name(), cmd, self.timeout).await?;

            let pages = numbered_pages(out_dir).await.map_err(|e| StageError::Failed {
                converter: self.name().to_string(),
                detail: e.to_string(),
            })?;
            if pages.is_empty() {
                return Err(StageError::Failed {
                    converter: self.name().to_string(),
                    detail: "no pages produced".into(),
                });
            }
            Ok(pages)
        })
    }
}

/// `page-N.png` files in `dir`, ordered by N. pdftoppm zero-pads N to the
/// width of the page count, so lexical order is not enough.
pub async fn numbered_pages(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("page-")?.strip_suffix(".png"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = number {
            found.push((n, path));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, p)| p).collect())
}
