//! End-to-end job lifecycle against the in-memory store: claim, render, write,
//! and terminal status, including failure paths.

use std::sync::Arc;

use quire::application::expression::{CompositeExpressionEvaluator, ExpressionLimits};
use quire::application::jobs::{
    AdaptiveBatchSizer, BatchSizerConfig, DocumentGenerationExecutor, JobPoller,
    JobWorkerContext, PollerSettings, RetentionPolicy, enqueue_job, wait_for_job_completion,
};
use quire::application::output::{OutputSettings, PdfOutputWriter};
use quire::application::render::{Element, RenderContext, RendererRegistry};
use quire::application::repos::{JobsRepo, RepoError};
use quire::application::theme::ThemeResolver;
use quire::domain::document::{Node, SlotId, TemplateDocument};
use quire::domain::entities::{MAX_ERROR_MESSAGE_CHARS, NewGenerationJob};
use quire::domain::theme::Theme;
use quire::domain::types::JobStatus;
use quire::infra::memory::InMemoryRepositories;
use serde_json::{Value, json};

fn invoice_document() -> TemplateDocument {
    serde_json::from_value(json!({
        "modelVersion": 1,
        "root": "root",
        "themeRef": {"type": "inherit"},
        "nodes": {
            "root": {"id": "root", "type": "container", "slots": ["root-children"]},
            "title": {"id": "title", "type": "text", "props": {"content": "Invoice {{number}}"}},
            "lines": {
                "id": "lines", "type": "loop", "slots": ["lines-body"],
                "props": {"expression": {"raw": "items", "language": "query"}, "itemAlias": "line"}
            },
            "line": {"id": "line", "type": "text", "props": {"content": "{{line.name}}"}},
            "boom": {"id": "boom", "type": "explode"}
        },
        "slots": {
            "root-children": {"id": "root-children", "nodeId": "root", "name": "children", "children": ["title", "lines"]},
            "lines-body": {"id": "lines-body", "nodeId": "lines", "name": "body", "children": ["line"]}
        }
    }))
    .expect("valid template document")
}

fn explode(_: &Node, _: &TemplateDocument, _: &RenderContext<'_>, _: &RendererRegistry) -> Vec<Element> {
    panic!("renderer exploded")
}

fn new_job(template_id: &str, data: Value) -> NewGenerationJob {
    NewGenerationJob {
        tenant_id: "acme".into(),
        template_id: template_id.into(),
        variant_id: "default".into(),
        version_id: None,
        environment_id: Some("production".into()),
        data,
        filename: None,
    }
}

fn poller(store: &Arc<InMemoryRepositories>) -> JobPoller {
    let mut renderers = RendererRegistry::with_builtins();
    renderers.register("explode", explode);

    let context = JobWorkerContext {
        templates: store.clone(),
        documents: store.clone(),
        themes: ThemeResolver::new(store.clone()),
        renderers: Arc::new(renderers),
        evaluator: Arc::new(CompositeExpressionEvaluator::with_limits(
            ExpressionLimits::default(),
        )),
        output: Arc::new(PdfOutputWriter::new(&OutputSettings::default())),
        retention: RetentionPolicy::default(),
    };
    let sizer = AdaptiveBatchSizer::new(BatchSizerConfig {
        min_batch_size: 4,
        ..BatchSizerConfig::default()
    })
    .expect("valid sizer");
    JobPoller::new(
        PollerSettings {
            max_concurrent_jobs: 4,
            instance_id: "lifecycle-test".into(),
            ..PollerSettings::default()
        },
        Arc::new(sizer),
        store.clone(),
        Arc::new(DocumentGenerationExecutor::new(context)),
    )
}

async fn drain_one_tick(poller: &JobPoller) -> usize {
    let report = poller.tick().await.expect("tick succeeds");
    let claimed = report.claimed;
    for task in report.tasks {
        task.await.expect("job task joins");
    }
    claimed
}

#[tokio::test]
async fn pending_job_is_rendered_and_completed() {
    let store = Arc::new(InMemoryRepositories::new());
    store.insert_template_version("acme", "invoice", "default", 3, invoice_document());
    store.activate("acme", "invoice", "default", "production", 3);
    store.insert_theme(
        "acme",
        Theme {
            id: "brand".into(),
            document_styles: [("fontSize".to_string(), json!(10))].into_iter().collect(),
            ..Theme::default()
        },
    );
    store.set_tenant_default_theme("acme", "brand");

    let job_id = enqueue_job(
        store.as_ref(),
        new_job(
            "invoice",
            json!({"number": "INV-7", "items": [{"name": "Paper"}, {"name": "Ink"}]}),
        ),
    )
    .await
    .expect("job enqueued");
    let poller = poller(&store);

    assert_eq!(drain_one_tick(&poller).await, 1);
    assert_eq!(poller.state().active(), 0);

    let job = store.find_job(job_id).await.unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.claimed_by.as_deref(), Some("lifecycle-test"));
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());
    assert!(job.claimant_consistent());

    let documents = store.documents();
    assert_eq!(documents.len(), 1);
    let stored = &documents[0];
    assert_eq!(Some(stored.id), job.document_id);
    assert_eq!(stored.document.content_type, "application/pdf");
    assert!(stored.document.filename.starts_with("invoice-"));
    let pdf = String::from_utf8_lossy(&stored.document.bytes);
    assert!(pdf.starts_with("%PDF-1.7"));
    assert!(pdf.contains("(Invoice INV-7) Tj"));
    assert!(pdf.contains("(Paper) Tj"));
    assert!(pdf.contains("(Ink) Tj"));
    assert!(pdf.contains("10 Tf"));

    let finished = wait_for_job_completion(store.as_ref(), job_id, std::time::Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn missing_template_fails_the_job() {
    let store = Arc::new(InMemoryRepositories::new());
    let job_id = store
        .enqueue_job(new_job("ghost", json!({})))
        .await
        .unwrap();
    let poller = poller(&store);

    assert_eq!(drain_one_tick(&poller).await, 1);

    let job = store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.expect("error recorded");
    assert!(message.contains("ghost"), "message was {message}");
    assert!(job.expires_at.is_some());
    assert!(store.documents().is_empty());
}

#[tokio::test]
async fn long_error_messages_are_truncated() {
    let store = Arc::new(InMemoryRepositories::new());
    let template_id = "t".repeat(2 * MAX_ERROR_MESSAGE_CHARS);
    let job_id = store
        .enqueue_job(new_job(&template_id, json!({})))
        .await
        .unwrap();

    drain_one_tick(&poller(&store)).await;

    let job = store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error_message.map(|message| message.chars().count()),
        Some(MAX_ERROR_MESSAGE_CHARS)
    );
}

#[tokio::test]
async fn panicking_renderer_fails_only_its_own_job() {
    let store = Arc::new(InMemoryRepositories::new());
    let mut broken = invoice_document();
    broken
        .slots
        .get_mut(&SlotId::from("root-children"))
        .unwrap()
        .children
        .push("boom".into());
    store.insert_template_version("acme", "broken", "default", 1, broken);
    store.activate("acme", "broken", "default", "production", 1);
    store.insert_template_version("acme", "invoice", "default", 1, invoice_document());
    store.activate("acme", "invoice", "default", "production", 1);

    let broken_id = store
        .enqueue_job(new_job("broken", json!({})))
        .await
        .unwrap();
    let healthy_id = store
        .enqueue_job(new_job("invoice", json!({"items": []})))
        .await
        .unwrap();
    let poller = poller(&store);
    let active_before = poller.state().active();

    assert_eq!(drain_one_tick(&poller).await, 2);
    assert_eq!(poller.state().active(), active_before);

    let broken = store.find_job(broken_id).await.unwrap().unwrap();
    assert_eq!(broken.status, JobStatus::Failed);
    assert!(
        broken
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("panicked"))
    );

    let healthy = store.find_job(healthy_id).await.unwrap().unwrap();
    assert_eq!(healthy.status, JobStatus::Completed);
}

#[tokio::test]
async fn non_object_data_is_rejected() {
    let store = Arc::new(InMemoryRepositories::new());
    let err = enqueue_job(store.as_ref(), new_job("invoice", json!([1, 2])))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput { .. }));

    // Written straight to the store, the worker refuses it instead.
    store.insert_template_version("acme", "invoice", "default", 1, invoice_document());
    store.activate("acme", "invoice", "default", "production", 1);
    let job_id = store
        .enqueue_job(new_job("invoice", json!("text")))
        .await
        .unwrap();
    drain_one_tick(&poller(&store)).await;

    let job = store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(
        job.error_message
            .as_deref()
            .is_some_and(|message| message.contains("a string"))
    );
}

#[tokio::test]
async fn cancelled_jobs_are_never_claimed() {
    let store = Arc::new(InMemoryRepositories::new());
    let job_id = store
        .enqueue_job(new_job("invoice", json!({})))
        .await
        .unwrap();
    assert!(store.cancel_job(job_id).await.unwrap());

    assert_eq!(drain_one_tick(&poller(&store)).await, 0);
    let job = store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(!store.cancel_job(job_id).await.unwrap());
}
