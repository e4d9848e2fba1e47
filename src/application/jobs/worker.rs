//! Execution of one claimed generation job.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task;
use tracing::{debug, info};

use crate::application::expression::CompositeExpressionEvaluator;
use crate::application::output::{OutputError, OutputWriter, RenderedOutput};
use crate::application::render::{RenderContext, RendererRegistry};
use crate::application::repos::{JobCompletion, RepoError};
use crate::domain::document::TemplateDocument;
use crate::domain::entities::{GenerationJob, NewGeneratedDocument, VersionSelector};
use crate::domain::theme::ResolvedStyles;

use super::context::JobWorkerContext;

#[derive(Debug, Error)]
pub enum JobExecutionError {
    #[error("template `{template_id}` variant `{variant_id}` has no revision for {target}")]
    TemplateNotFound {
        template_id: String,
        variant_id: String,
        target: String,
    },
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error("render failed: {0}")]
    Render(String),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("job data must be a JSON object, got {0}")]
    DataShape(&'static str),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Runs a claimed job to a terminal outcome. Errors become a Failed job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &GenerationJob) -> Result<JobCompletion, JobExecutionError>;
}

/// Load the template, resolve its theme, render, write the PDF and store it.
pub struct DocumentGenerationExecutor {
    ctx: JobWorkerContext,
}

impl DocumentGenerationExecutor {
    pub fn new(ctx: JobWorkerContext) -> Self {
        Self { ctx }
    }
}

fn describe_target(target: &VersionSelector) -> String {
    match target {
        VersionSelector::Version(version) => format!("version {version}"),
        VersionSelector::Environment(environment) => format!("environment `{environment}`"),
    }
}

fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Render `document` against `data` and serialise it. CPU bound.
pub fn render_to_output(
    document: &TemplateDocument,
    data: &serde_json::Value,
    styles: &ResolvedStyles,
    renderers: &RendererRegistry,
    evaluator: &CompositeExpressionEvaluator,
    output: &dyn OutputWriter,
) -> Result<RenderedOutput, JobExecutionError> {
    if document.node(&document.root).is_none() {
        return Err(JobExecutionError::Render(format!(
            "root node `{}` is not part of the document",
            document.root
        )));
    }
    let ctx = RenderContext::new(data, styles, evaluator);
    let rendered = renderers.render_document(document, &ctx);
    Ok(output.write(&rendered)?)
}

#[async_trait]
impl JobExecutor for DocumentGenerationExecutor {
    async fn execute(&self, job: &GenerationJob) -> Result<JobCompletion, JobExecutionError> {
        if !(job.data.is_object() || job.data.is_null()) {
            return Err(JobExecutionError::DataShape(value_kind(&job.data)));
        }

        let snapshot = self
            .ctx
            .templates
            .load_template(&job.tenant_id, &job.template_id, &job.variant_id, &job.target)
            .await?
            .ok_or_else(|| JobExecutionError::TemplateNotFound {
                template_id: job.template_id.clone(),
                variant_id: job.variant_id.clone(),
                target: describe_target(&job.target),
            })?;
        let styles = self.ctx.themes.resolve_styles(&job.tenant_id, &snapshot).await?;

        let renderers = Arc::clone(&self.ctx.renderers);
        let evaluator = Arc::clone(&self.ctx.evaluator);
        let output = Arc::clone(&self.ctx.output);
        let data = job.data.clone();
        let document = snapshot.document;
        let rendered = task::spawn_blocking(move || {
            render_to_output(
                &document,
                &data,
                &styles,
                &renderers,
                &evaluator,
                output.as_ref(),
            )
        })
        .await
        .map_err(|err| JobExecutionError::Panicked(err.to_string()))??;
        debug!(
            target = "application::jobs::worker",
            job_id = %job.id,
            size_bytes = rendered.size_bytes,
            "document rendered"
        );

        let now = OffsetDateTime::now_utc();
        let filename = job
            .filename
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}.pdf", job.template_id, job.id));
        let document_id = self
            .ctx
            .documents
            .store_document(NewGeneratedDocument {
                tenant_id: job.tenant_id.clone(),
                job_id: job.id,
                filename,
                content_type: rendered.content_type.to_string(),
                bytes: rendered.bytes,
                expires_at: now + self.ctx.retention.document,
            })
            .await?;

        info!(
            target = "application::jobs::worker",
            job_id = %job.id,
            tenant = %job.tenant_id,
            %document_id,
            "document stored"
        );
        Ok(JobCompletion {
            document_id,
            expires_at: now + self.ctx.retention.job,
        })
    }
}
