//! Integration tests for the report service: generate, rewrite and preview
//! against an in-memory catalog, a scripted generation backend and fake
//! preview converters. No network, no LibreOffice.

mod common;

use common::*;
use reportdeck::{
    AuditSink, ContentSource, DirectoryCatalog, GenerationBackend, GenerationError, JsonlAuditSink,
    PipelineConfig, PreviewArtifact, ReportError, ReportService, RewriteRequest, Severity, Warning,
};
use reportdeck::slidespec::ChartPayload;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn live(backend: &Arc<EchoBackend>) -> HarnessOptions {
    HarnessOptions {
        backend: Some(backend.clone() as Arc<dyn GenerationBackend>),
        ..HarnessOptions::default()
    }
}

// ── Generate ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn generation_disabled_still_fills_every_slot() {
    let h = harness(HarnessOptions::default());
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    assert_eq!(report.job_id, job_id());
    assert_eq!(report.revision, 1);
    for slide in &descriptor().slides {
        for p in &slide.placeholders {
            let value = report.slidespec.get(&slide.slide_key, &p.token);
            assert!(
                value.is_some_and(|v| !v.is_null()),
                "{}/{} unresolved",
                slide.slide_key,
                p.token
            );
        }
    }
    assert!(report
        .sources
        .values()
        .all(|s| *s == ContentSource::Deterministic));
    assert_eq!(report.sources.len(), 3);

    let overview = read_part(&report.artifact_path, "ppt/slides/slide1.xml").unwrap();
    assert!(overview.contains("Acme Corp"));
    assert!(overview.contains("Alerts this month: 1234"));
    assert!(!overview.contains("{{"));

    assert_eq!(h.audit.count("generate"), 1);
    assert_eq!(h.audit.count("generation_fallback"), 1);
}

#[tokio::test]
async fn live_content_lands_in_slidespec_and_deck() {
    let backend = EchoBackend::new();
    backend.answer("SUMMARY", json!("Acme saw 1234 alerts this month."));
    let h = harness(live(&backend));
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    assert_eq!(
        report.slidespec.get("overview", "SUMMARY"),
        Some(&json!("Acme saw 1234 alerts this month."))
    );
    assert!(report.sources.values().all(|s| *s == ContentSource::Live));
    assert_eq!(report.validation_warnings().count(), 0);
    assert_eq!(h.audit.count("generation_fallback"), 0);

    let overview = read_part(&report.artifact_path, "ppt/slides/slide1.xml").unwrap();
    assert!(overview.contains("Acme saw 1234 alerts this month."));
}

#[tokio::test]
async fn wrong_number_yields_exactly_one_warning() {
    let backend = EchoBackend::new();
    backend.answer("SUMMARY", json!("Acme saw 5000 alerts this month."));
    let h = harness(live(&backend));
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    let warnings: Vec<_> = report.validation_warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].slide_key, "overview");
    assert_eq!(warnings[0].token, "SUMMARY");
    assert_eq!(warnings[0].expected, "1234");
    assert_eq!(warnings[0].observed, "5000");
    assert_eq!(warnings[0].severity, Severity::Critical);

    let events = h.audit.events();
    let flagged: Vec<_> = events
        .iter()
        .filter(|e| e.event == "validation_warning")
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].slide_key.as_deref(), Some("overview"));
    assert_eq!(flagged[0].details["token"], "SUMMARY");
}

#[tokio::test]
async fn chart_and_table_are_drawn_natively() {
    let h = harness(HarnessOptions::default());
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    let trend = ChartPayload::from_value(report.slidespec.get("alerts", "TREND").unwrap()).unwrap();
    assert_eq!(trend.categories, ["W1", "W2", "W3", "W4"]);
    assert_eq!(trend.values, [10.0, 15.0, 9.0, 20.0]);

    let chart = read_part(&report.artifact_path, "ppt/charts/chart1.xml").unwrap();
    assert!(chart.contains("<c:barChart>"));
    assert!(chart.contains("<c:v>W4</c:v>"));
    assert!(chart.contains("<c:v>20</c:v>"));
    let alerts = read_part(&report.artifact_path, "ppt/slides/slide2.xml").unwrap();
    assert!(alerts.contains("<p:graphicFrame>") || alerts.contains("<p:graphicFrame "));
    assert!(!alerts.contains("{{TREND}}"));

    let incidents = read_part(&report.artifact_path, "ppt/slides/slide3.xml").unwrap();
    assert_eq!(incidents.matches("<a:tr ").count(), 6, "header + 5 capped rows");
    assert!(incidents.contains("INC-1"));
    assert!(incidents.contains("50%"));
    assert!(!incidents.contains("INC-6"));
}

#[tokio::test]
async fn recorded_tier_fills_what_live_cannot() {
    let recorded = json!({
        "template_id": TEMPLATE_ID,
        "slides": [{"slide_no": 1, "slide_key": "overview", "placeholders": {
            "SUMMARY": "Recorded: 1234 alerts were triaged."
        }}]
    });
    let h = harness(HarnessOptions {
        recorded: Some(recorded),
        ..HarnessOptions::default()
    });
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    assert_eq!(
        report.slidespec.get("overview", "SUMMARY"),
        Some(&json!("Recorded: 1234 alerts were triaged."))
    );
    assert_eq!(report.sources["overview"], ContentSource::Recorded);
    assert_eq!(report.sources["alerts"], ContentSource::Deterministic);
}

#[tokio::test]
async fn fatal_backend_error_falls_through_without_retry() {
    let backend = EchoBackend::new();
    backend.fail_with(vec![GenerationError::Auth {
        detail: "invalid api key".into(),
    }]);
    let h = harness(live(&backend));
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    assert_eq!(backend.calls(), 1);
    assert!(report
        .sources
        .values()
        .all(|s| *s == ContentSource::Deterministic));
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::Generation { .. })));
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let backend = EchoBackend::new();
    backend.fail_with(vec![
        GenerationError::Server {
            detail: "503".into(),
        },
        GenerationError::RateLimited { retry_after: None },
    ]);
    let h = harness(live(&backend));
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    assert_eq!(backend.calls(), 3);
    assert!(report.sources.values().all(|s| *s == ContentSource::Live));
}

#[tokio::test]
async fn regenerate_keeps_one_job_and_bumps_revision() {
    let h = harness(HarnessOptions::default());
    let first = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    let second = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(second.revision, 2);
    assert_eq!(first.artifact_path, second.artifact_path);
}

#[tokio::test]
async fn unknown_catalog_entries_are_fatal() {
    let h = harness(HarnessOptions::default());
    assert!(matches!(
        h.service.generate("nobody", TEMPLATE_ID).await,
        Err(ReportError::InputNotFound { .. })
    ));
    assert!(matches!(
        h.service.generate(INPUT_ID, "nothing").await,
        Err(ReportError::TemplateNotFound { .. })
    ));
}

// ── Rewrite ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rewrite_changes_only_the_target_slide() {
    let backend = EchoBackend::new();
    let h = harness(live(&backend));
    let before = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    let after = h
        .service
        .rewrite(&job_id(), RewriteRequest::new("alerts").instruction("Focus on phishing"))
        .await
        .unwrap();

    assert_eq!(after.revision, 2);
    assert_ne!(
        before.slidespec.slide("alerts").unwrap(),
        after.slidespec.slide("alerts").unwrap()
    );
    for key in ["overview", "incidents"] {
        assert_eq!(
            serde_json::to_vec(before.slidespec.slide(key).unwrap()).unwrap(),
            serde_json::to_vec(after.slidespec.slide(key).unwrap()).unwrap(),
            "slide {key} changed"
        );
    }
    let last = backend.requests().pop().unwrap();
    assert!(last.contains("Focus on phishing"));
    assert!(last.contains("\"alerts\""));
    assert!(!last.contains("\"overview\""));
    assert_eq!(h.audit.count("rewrite"), 1);
}

#[tokio::test]
async fn rewrite_overrides_apply_after_generation() {
    let h = harness(HarnessOptions::default());
    h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    let report = h
        .service
        .rewrite(
            &job_id(),
            RewriteRequest::new("incidents").set("NEXT_STEPS", json!("Rotate keys by Friday.")),
        )
        .await
        .unwrap();
    assert_eq!(
        report.slidespec.get("incidents", "NEXT_STEPS"),
        Some(&json!("Rotate keys by Friday."))
    );
    let deck = read_part(&report.artifact_path, "ppt/slides/slide3.xml").unwrap();
    assert!(deck.contains("Rotate keys by Friday."));

    let events = h.audit.events();
    let rewrite = events.iter().find(|e| e.event == "rewrite").unwrap();
    assert_eq!(rewrite.details["fields"], json!(["NEXT_STEPS"]));
}

#[tokio::test]
async fn rewrite_errors() {
    let h = harness(HarnessOptions::default());
    assert!(matches!(
        h.service.rewrite(&job_id(), RewriteRequest::new("overview")).await,
        Err(ReportError::JobNotFound { .. })
    ));
    h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    assert!(matches!(
        h.service.rewrite(&job_id(), RewriteRequest::new("appendix")).await,
        Err(ReportError::UnknownSlide { .. })
    ));
    assert!(matches!(
        h.service.rewrite("no-colon", RewriteRequest::new("overview")).await,
        Err(ReportError::InvalidJobId { .. })
    ));
    let unchanged = h.service.job(&job_id()).await.unwrap();
    assert_eq!(unchanged.revision, 1);
}

#[tokio::test]
async fn concurrent_rewrites_of_different_slides_both_persist() {
    let h = harness(HarnessOptions::default());
    h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    let service = &h.service;
    let id = job_id();

    let (a, b) = tokio::join!(
        service.rewrite(&id, RewriteRequest::new("overview").set("SUMMARY", json!("A wrote this."))),
        service.rewrite(&id, RewriteRequest::new("incidents").set("NEXT_STEPS", json!("B wrote this."))),
    );
    let mut revisions = [a.unwrap().revision, b.unwrap().revision];
    revisions.sort();
    assert_eq!(revisions, [2, 3]);

    let job = service.job(&id).await.unwrap();
    assert_eq!(job.revision, 3);
    assert_eq!(job.slidespec.get("overview", "SUMMARY"), Some(&json!("A wrote this.")));
    assert_eq!(job.slidespec.get("incidents", "NEXT_STEPS"), Some(&json!("B wrote this.")));
}

#[tokio::test]
async fn concurrent_rewrites_of_one_slide_are_serialised_and_later_wins() {
    let h = harness(HarnessOptions::default());
    h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    let id = job_id();

    // join! polls the first future first, so it queues on the job lock first.
    let (first, second) = tokio::join!(
        h.service.rewrite(&id, RewriteRequest::new("overview").set("SUMMARY", json!("first"))),
        h.service.rewrite(&id, RewriteRequest::new("overview").set("SUMMARY", json!("second"))),
    );
    assert_eq!(first.unwrap().revision, 2);
    assert_eq!(second.unwrap().revision, 3);

    let job = h.service.job(&id).await.unwrap();
    assert_eq!(job.slidespec.get("overview", "SUMMARY"), Some(&json!("second")));
}

// ── Preview ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn preview_is_cached_until_the_deck_changes() {
    let h = harness(HarnessOptions::default());
    h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();

    let first = h.service.preview(&job_id()).await.unwrap();
    let PreviewArtifact::Images(pages) = &first.artifact else {
        panic!("expected page images");
    };
    assert_eq!(pages.len(), 3);
    assert!(!first.cached);

    let again = h.service.preview(&job_id()).await.unwrap();
    assert!(again.cached);
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 1);

    h.service
        .rewrite(
            &job_id(),
            RewriteRequest::new("overview").set("SUMMARY", json!("Changed.")),
        )
        .await
        .unwrap();
    let fresh = h.service.preview(&job_id()).await.unwrap();
    assert!(!fresh.cached);
    assert_ne!(fresh.artifact_sha256, first.artifact_sha256);
    assert_eq!(h.audit.count("preview"), 3);
}

#[tokio::test]
async fn preview_falls_back_to_second_rasterizer() {
    let h = harness(HarnessOptions {
        pdfium_available: false,
        ..HarnessOptions::default()
    });
    h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    let outcome = h.service.preview(&job_id()).await.unwrap();
    assert!(matches!(outcome.artifact, PreviewArtifact::Images(ref p) if p.len() == 3));
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].contains("pdfium"));
}

#[tokio::test]
async fn preview_rerenders_a_missing_deck() {
    let h = harness(HarnessOptions::default());
    let report = h.service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
    std::fs::remove_file(&report.artifact_path).unwrap();

    let outcome = h.service.preview(&job_id()).await.unwrap();
    assert!(report.artifact_path.exists());
    assert!(matches!(outcome.artifact, PreviewArtifact::Images(_)));
}

#[tokio::test]
async fn preview_without_job_is_not_found() {
    let h = harness(HarnessOptions::default());
    assert!(matches!(
        h.service.preview(&job_id()).await,
        Err(ReportError::JobNotFound { .. })
    ));
}

// ── Persistence and on-disk collaborators ────────────────────────────────

#[tokio::test]
async fn jobs_survive_a_new_service_instance() {
    let dir = tempfile::tempdir().unwrap();
    let templates = dir.path().join("templates");
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::create_dir_all(&inputs).unwrap();
    std::fs::write(
        templates.join(format!("{TEMPLATE_ID}.json")),
        descriptor_json().to_string(),
    )
    .unwrap();
    std::fs::write(templates.join(format!("{TEMPLATE_ID}.pptx")), document_bytes()).unwrap();
    std::fs::write(
        inputs.join(format!("{INPUT_ID}.json")),
        tenant_input().to_string(),
    )
    .unwrap();

    let config = || {
        PipelineConfig::builder()
            .output_dir(dir.path().join("outputs"))
            .enable_generation(false)
            .build()
            .unwrap()
    };

    let audit_path = config().audit_log_path();
    {
        let audit = Arc::new(JsonlAuditSink::new(&audit_path));
        let service = ReportService::new(
            config(),
            Arc::new(DirectoryCatalog::new(&templates, &inputs)),
            audit.clone() as Arc<dyn AuditSink>,
        );
        service.generate(INPUT_ID, TEMPLATE_ID).await.unwrap();
        let events = audit.read_recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.event == "generate" && e.job_id == job_id()));
    }

    let audit = Arc::new(JsonlAuditSink::new(&audit_path));
    let service = ReportService::new(
        config(),
        Arc::new(DirectoryCatalog::new(&templates, &inputs)),
        audit.clone() as Arc<dyn AuditSink>,
    );
    let job = assert_ok!(service.job(&job_id()).await);
    assert_eq!(job.revision, 1);
    let report = assert_ok!(
        service
            .rewrite(&job_id(), RewriteRequest::new("overview"))
            .await
    );
    assert_eq!(report.revision, 2);
    assert_err!(service.job("acme:other_template").await);

    let tail = audit.read_recent(1).await.unwrap();
    assert_eq!(tail[0].event, "rewrite");
}
