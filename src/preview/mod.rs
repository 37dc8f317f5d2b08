//! Preview generation: rendered deck → page images.
//!
//! ## Chain
//!
//! ```text
//! PPTX ──▶ [DocumentConverter…] ──▶ PDF ──▶ [Rasterizer…] ──▶ PNG pages
//!                                     └───── all rasterizers failed ──▶ PDF
//! ```
//!
//! Each stage tries its converters in order, each up to `stage_attempts`
//! times. Only when every document converter fails does the caller see
//! [`ReportError::PreviewUnavailable`]; a PDF with no images is still a
//! usable preview.
//!
//! ## Cache
//!
//! Results live under `<cache>/<sanitised job id>/<sha256 of artifact>/`
//! with a `manifest.json` listing the produced files. A rewrite changes the
//! artifact bytes and therefore the hash; the next preview misses, renders
//! afresh, and removes the job's older hash directories.

pub mod converters;

pub use converters::{
    DocumentConverter, OfficeConverter, PdfiumRasterizer, PopplerRasterizer, Rasterizer,
};

use crate::config::PipelineConfig;
use crate::error::{ReportError, StageError};
use crate::job::JobKey;
use crate::output::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MANIFEST: &str = "manifest.json";

/// What a preview produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "paths", rename_all = "snake_case")]
pub enum PreviewArtifact {
    /// One PNG per page, in page order.
    Images(Vec<PathBuf>),
    /// Rasterisation failed everywhere; the PDF itself.
    Document(PathBuf),
}

impl PreviewArtifact {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            PreviewArtifact::Images(v) => v.iter().map(PathBuf::as_path).collect(),
            PreviewArtifact::Document(p) => vec![p.as_path()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub artifact: PreviewArtifact,
    pub artifact_sha256: String,
    pub cached: bool,
    /// Stage failures encountered on the way, oldest first.
    pub failures: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    job_id: String,
    artifact_sha256: String,
    created_at: DateTime<Utc>,
    converter: String,
    rasterizer: Option<String>,
    /// File names relative to the cache entry.
    files: Vec<String>,
}

pub struct PreviewPipeline {
    cache_dir: PathBuf,
    converters: Vec<Arc<dyn DocumentConverter>>,
    rasterizers: Vec<Arc<dyn Rasterizer>>,
    stage_attempts: u32,
}

impl PreviewPipeline {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        converters: Vec<Arc<dyn DocumentConverter>>,
        rasterizers: Vec<Arc<dyn Rasterizer>>,
        stage_attempts: u32,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            converters,
            rasterizers,
            stage_attempts: stage_attempts.max(1),
        }
    }

    /// LibreOffice, then pdfium with poppler as the fallback rasterizer.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let p = &config.preview;
        Self::new(
            config.preview_cache_dir(),
            vec![Arc::new(OfficeConverter::from_config(p))],
            vec![
                Arc::new(PdfiumRasterizer::from_config(p)),
                Arc::new(PopplerRasterizer::from_config(p)),
            ],
            p.stage_attempts,
        )
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Preview the rendered artifact of `key`, from cache when possible.
    pub async fn preview(&self, key: &JobKey, artifact: &Path) -> Result<PreviewOutcome, ReportError> {
        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|e| ReportError::PreviewUnavailable {
                job_id: key.id(),
                attempts: vec![format!("reading {}: {e}", artifact.display())],
            })?;
        let hash = hex::encode(Sha256::digest(&bytes));
        let job_dir = self.cache_dir.join(key.sanitized());
        let entry = job_dir.join(&hash);

        if let Some(cached) = read_manifest(&entry).await {
            debug!("Preview cache hit for {} ({})", key, &hash[..12]);
            return Ok(PreviewOutcome {
                artifact: cached,
                artifact_sha256: hash,
                cached: true,
                failures: Vec::new(),
            });
        }

        evict_stale(&job_dir, &hash).await;
        let _ = tokio::fs::remove_dir_all(&entry).await;
        tokio::fs::create_dir_all(&entry)
            .await
            .map_err(|e| ReportError::OutputWriteFailed {
                path: entry.clone(),
                source: e,
            })?;

        // Converters read a private copy, named after the job so the PDF is too.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&job_dir)
            .map_err(|e| ReportError::OutputWriteFailed {
                path: job_dir.clone(),
                source: e,
            })?;
        let staged = staging.path().join(format!("{}.pptx", key.sanitized()));
        tokio::fs::write(&staged, &bytes)
            .await
            .map_err(|e| ReportError::OutputWriteFailed {
                path: staged.clone(),
                source: e,
            })?;

        let mut failures = Vec::new();

        let converted = first_success(&self.converters, self.stage_attempts, &mut failures, |c| {
            c.to_pdf(&staged, &entry)
        })
        .await;
        let Some((converter, pdf)) = converted else {
            warn!("No document converter succeeded for {}", key);
            return Err(ReportError::PreviewUnavailable {
                job_id: key.id(),
                attempts: failures,
            });
        };

        let pages_dir = entry.join("pages");
        let pdf_path = pdf.as_path();
        let rasterized = first_success(&self.rasterizers, self.stage_attempts, &mut failures, |r| {
            let dir = pages_dir.clone();
            async move {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                r.rasterize(pdf_path, &dir).await
            }
        })
        .await;

        let (artifact_out, rasterizer) = match rasterized {
            Some((name, pages)) => (PreviewArtifact::Images(pages), Some(name)),
            None => {
                warn!("All rasterizers failed for {}; returning the PDF", key);
                (PreviewArtifact::Document(pdf.clone()), None)
            }
        };

        let manifest = Manifest {
            job_id: key.id(),
            artifact_sha256: hash.clone(),
            created_at: Utc::now(),
            converter,
            rasterizer,
            files: artifact_out
                .paths()
                .iter()
                .filter_map(|p| p.strip_prefix(&entry).ok())
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ReportError::Internal(format!("serialising preview manifest: {e}")))?;
        write_atomic(&entry.join(MANIFEST), &json).await?;

        info!(
            "Preview for {}: {} file(s) via {}{}",
            key,
            manifest.files.len(),
            manifest.converter,
            manifest
                .rasterizer
                .as_deref()
                .map(|r| format!(" + {r}"))
                .unwrap_or_default()
        );
        Ok(PreviewOutcome {
            artifact: artifact_out,
            artifact_sha256: hash,
            cached: false,
            failures,
        })
    }
}

/// Named stage implementations.
trait Named {
    fn stage_name(&self) -> &str;
}

impl Named for Arc<dyn DocumentConverter> {
    fn stage_name(&self) -> &str {
        self.name()
    }
}

impl Named for Arc<dyn Rasterizer> {
    fn stage_name(&self) -> &str {
        self.name()
    }
}

/// Try each implementation in order, each up to `attempts` times. Returns
/// the winner's name and result; every failure is appended to `failures`.
async fn first_success<'a, S, T, F, Fut>(
    stages: &'a [S],
    attempts: u32,
    failures: &mut Vec<String>,
    mut run: F,
) -> Option<(String, T)>
where
    S: Named,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    for stage in stages {
        for attempt in 1..=attempts {
            match run(stage).await {
                Ok(value) => return Some((stage.stage_name().to_string(), value)),
                Err(e) => {
                    warn!(
                        "Preview stage {} attempt {}/{} failed: {}",
                        stage.stage_name(),
                        attempt,
                        attempts,
                        e
                    );
                    let unavailable = matches!(e, StageError::Unavailable { .. });
                    failures.push(e.to_string());
                    if unavailable {
                        break;
                    }
                }
            }
        }
    }
    None
}

async fn read_manifest(entry: &Path) -> Option<PreviewArtifact> {
    let text = tokio::fs::read_to_string(entry.join(MANIFEST)).await.ok()?;
    let manifest: Manifest = serde_json::from_str(&text).ok()?;
    let files: Vec<PathBuf> = manifest.files.iter().map(|f| entry.join(f)).collect();
    if files.is_empty() || !files.iter().all(|f| f.exists()) {
        return None;
    }
    Some(match manifest.rasterizer {
        Some(_) => PreviewArtifact::Images(files),
        None => PreviewArtifact::Document(files.into_iter().next()?),
    })
}

/// Remove the job's cache entries for other artifact hashes.
async fn evict_stale(job_dir: &Path, keep: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(job_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_str() == Some(keep) {
            continue;
        }
        let path = entry.path();
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!("Evicted stale preview {}", path.display()),
            Err(e) => warn!("Could not evict {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Writes `<stem>.pdf` after `fail_first` failures.
    struct FakeConverter {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FakeConverter {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl DocumentConverter for FakeConverter {
        fn name(&self) -> &str {
            "fake-office"
        }
        fn to_pdf<'a>(&'a self, input: &'a Path, out_dir: &'a Path) -> BoxFuture<'a, Result<PathBuf, StageError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.fail_first {
                    return Err(StageError::Failed {
                        converter: "fake-office".into(),
                        detail: "crashed".into(),
                    });
                }
                let pdf = out_dir.join("deck.pdf");
                let bytes = tokio::fs::read(input).await.unwrap();
                tokio::fs::write(&pdf, bytes).await.unwrap();
                Ok(pdf)
            })
        }
    }

    /// Writes two fixed pages, or always fails.
    struct FakeRaster {
        name: &'static str,
        works: bool,
    }

    impl Rasterizer for FakeRaster {
        fn name(&self) -> &str {
            self.name
        }
        fn rasterize<'a>(&'a self, _pdf: &'a Path, out_dir: &'a Path) -> BoxFuture<'a, Result<Vec<PathBuf>, StageError>> {
            Box::pin(async move {
                if !self.works {
                    return Err(StageError::Unavailable {
                        converter: self.name.into(),
                        detail: "library not found".into(),
                    });
                }
                tokio::fs::create_dir_all(out_dir).await.unwrap();
                let mut pages = Vec::new();
                for i in 1..=2 {
                    let p = out_dir.join(format!("page-{i}.png"));
                    tokio::fs::write(&p, format!("png {i}")).await.unwrap();
                    pages.push(p);
                }
                Ok(pages)
            })
        }
    }

    fn raster(name: &'static str, works: bool) -> Arc<dyn Rasterizer> {
        Arc::new(FakeRaster { name, works })
    }

    fn office(c: &Arc<FakeConverter>) -> Arc<dyn DocumentConverter> {
        c.clone()
    }

    async fn artifact(dir: &Path, body: &str) -> PathBuf {
        let p = dir.join("acme_tpl.pptx");
        tokio::fs::write(&p, body).await.unwrap();
        p
    }

    fn contents(paths: &[PathBuf]) -> Vec<Vec<u8>> {
        paths.iter().map(|p| std::fs::read(p).unwrap()).collect()
    }

    #[tokio::test]
    async fn fallback_rasterizer_gives_same_images() {
        let dir = tempfile::tempdir().unwrap();
        let art = artifact(dir.path(), "deck v1").await;
        let key = JobKey::new("acme", "tpl");

        let first = PreviewPipeline::new(
            dir.path().join("a"),
            vec![office(&FakeConverter::new(0))],
            vec![raster("primary", true)],
            2,
        );
        let second = PreviewPipeline::new(
            dir.path().join("b"),
            vec![office(&FakeConverter::new(0))],
            vec![raster("primary", false), raster("secondary", true)],
            2,
        );
        let a = first.preview(&key, &art).await.unwrap();
        let b = second.preview(&key, &art).await.unwrap();
        let (PreviewArtifact::Images(ai), PreviewArtifact::Images(bi)) = (&a.artifact, &b.artifact) else {
            panic!("expected images");
        };
        assert_eq!(contents(ai), contents(bi));
        assert_eq!(b.failures.len(), 1);
    }

    #[tokio::test]
    async fn all_rasterizers_failing_returns_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let art = artifact(dir.path(), "deck").await;
        let p = PreviewPipeline::new(
            dir.path().join("cache"),
            vec![office(&FakeConverter::new(0))],
            vec![raster("a", false), raster("b", false)],
            2,
        );
        let out = p.preview(&JobKey::new("acme", "tpl"), &art).await.unwrap();
        assert!(matches!(out.artifact, PreviewArtifact::Document(ref pdf) if pdf.ends_with("deck.pdf")));
    }

    #[tokio::test]
    async fn converter_retries_then_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let art = artifact(dir.path(), "deck").await;
        let flaky = FakeConverter::new(1);
        let p = PreviewPipeline::new(dir.path().join("c1"), vec![office(&flaky)], vec![raster("r", true)], 2);
        let out = p.preview(&JobKey::new("acme", "tpl"), &art).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.failures.len(), 1);

        let broken = FakeConverter::new(u32::MAX);
        let p = PreviewPipeline::new(dir.path().join("c2"), vec![office(&broken)], vec![raster("r", true)], 2);
        let err = p.preview(&JobKey::new("acme", "tpl"), &art).await.unwrap_err();
        match err {
            ReportError::PreviewUnavailable { attempts, .. } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn cache_hits_and_invalidates_on_new_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let key = JobKey::new("acme", "tpl");
        let conv = FakeConverter::new(0);
        let p = PreviewPipeline::new(dir.path().join("cache"), vec![office(&conv)], vec![raster("r", true)], 1);

        let art = artifact(dir.path(), "deck v1").await;
        let first = p.preview(&key, &art).await.unwrap();
        let again = p.preview(&key, &art).await.unwrap();
        assert!(!first.cached && again.cached);
        assert_eq!(first.artifact, again.artifact);
        assert_eq!(conv.calls.load(Ordering::SeqCst), 1);

        let art = artifact(dir.path(), "deck v2").await;
        let fresh = p.preview(&key, &art).await.unwrap();
        assert!(!fresh.cached);
        assert_ne!(fresh.artifact_sha256, first.artifact_sha256);
        let job_dir = p.cache_dir().join(key.sanitized());
        let entries: Vec<_> = std::fs::read_dir(&job_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(!job_dir.join(&first.artifact_sha256).exists());
    }
}
