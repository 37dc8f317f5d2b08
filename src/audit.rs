//! Append-only audit trail.
//!
//! Audit events are the only state shared across jobs. Sinks take events
//! fire-and-forget: [`AuditSink::record`] never blocks and never fails the
//! operation that produced the event.
//!
//! [`JsonlAuditSink`] hands events to a single writer task over an unbounded
//! channel; the task owns the file and appends one JSON object per line, so
//! concurrent jobs never contend on a lock for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// `generate`, `rewrite`, `validation_warning`, `generation_fallback`
    /// or `preview`.
    pub event: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl AuditEvent {
    pub fn new(event: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            job_id: job_id.into(),
            slide_key: None,
            severity: None,
            details: Value::Null,
        }
    }

    pub fn slide(mut self, slide_key: impl Into<String>) -> Self {
        self.slide_key = Some(slide_key.into());
        self
    }

    pub fn severity(mut self, severity: impl ToString) -> Self {
        self.severity = Some(severity.to_string());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// ── JSON lines ───────────────────────────────────────────────────────────

enum Command {
    Append(AuditEvent),
    Flush(oneshot::Sender<()>),
}

/// Appends events to a JSON-lines file from a background task.
///
/// Must be created inside a Tokio runtime.
pub struct JsonlAuditSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<Command>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(path.clone(), rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until every event recorded so far is on disk.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// The last `limit` events, oldest first. Unparseable lines are skipped.
    pub async fn read_recent(&self, limit: usize) -> std::io::Result<Vec<AuditEvent>> {
        self.flush().await;
        read_recent(&self.path, limit).await
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.tx.send(Command::Append(event)).is_err() {
            warn!("Audit writer for {} has stopped; event dropped", self.path.display());
        }
    }
}

async fn writer_task(path: PathBuf, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut file = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Append(event) => {
                if file.is_none() {
                    file = open_append(&path).await;
                }
                let Some(f) = file.as_mut() else {
                    continue;
                };
                let mut line = match serde_json::to_vec(&event) {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("Unserialisable audit event {}: {}", event.event, e);
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = f.write_all(&line).await {
                    warn!("Audit append to {} failed: {}", path.display(), e);
                    file = None;
                }
            }
            Command::Flush(done) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush().await;
                }
                let _ = done.send(());
            }
        }
    }
    debug!("Audit writer for {} stopped", path.display());
}

async fn open_append(path: &Path) -> Option<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(f) => {
            info!("Audit log: {}", path.display());
            Some(f)
        }
        Err(e) => {
            warn!("Cannot open audit log {}: {}", path.display(), e);
            None
        }
    }
}

/// The last `limit` events of a JSON-lines audit file. A missing file is an
/// empty log.
pub async fn read_recent(path: &Path, limit: usize) -> std::io::Result<Vec<AuditEvent>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..]
        .iter()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

// ── Other sinks ──────────────────────────────────────────────────────────

/// Keeps events in memory. Useful for tests and embedding.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event == event)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

/// Emits events as `tracing` records only.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "reportdeck::audit",
            kind = %event.event,
            job_id = %event.job_id,
            slide_key = event.slide_key.as_deref().unwrap_or(""),
            "{}",
            event.details
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn appends_lines_and_reads_tail() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("logs").join("audit.jsonl"));
        for i in 0..5 {
            sink.record(AuditEvent::new("generate", format!("in{i}:tpl")).details(json!({"i": i})));
        }
        let recent = sink.read_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].job_id, "in3:tpl");
        assert_eq!(recent[1].details["i"], 4);

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().all(|l| l.contains("\"timestamp\"")));
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonlAuditSink::new(dir.path().join("audit.jsonl")));
        let mut tasks = Vec::new();
        for t in 0..8 {
            let sink = Arc::clone(&sink);
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    sink.record(
                        AuditEvent::new("rewrite", format!("job{t}:tpl"))
                            .slide(format!("s{i}"))
                            .details(json!({"pad": "x".repeat(200)})),
                    );
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let all = sink.read_recent(usize::MAX).await.unwrap();
        assert_eq!(all.len(), 200);
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_recent(&dir.path().join("none.jsonl"), 10).await.unwrap().is_empty());
    }

    #[test]
    fn memory_sink_counts() {
        let sink = MemoryAuditSink::default();
        sink.record(AuditEvent::new("preview", "a:b"));
        sink.record(AuditEvent::new("validation_warning", "a:b").severity("critical"));
        assert_eq!(sink.count("preview"), 1);
        assert_eq!(sink.events()[1].severity.as_deref(), Some("critical"));
    }
}
