use std::sync::Arc;

use time::Duration;

use crate::application::expression::CompositeExpressionEvaluator;
use crate::application::output::OutputWriter;
use crate::application::render::RendererRegistry;
use crate::application::repos::{DocumentsRepo, TemplateCatalog};
use crate::application::theme::ThemeResolver;

/// How long finished jobs and generated documents are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub job: Duration,
    pub document: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            job: Duration::days(7),
            document: Duration::days(30),
        }
    }
}

/// Shared context passed to job workers so they can reach stores and engines.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub templates: Arc<dyn TemplateCatalog>,
    pub documents: Arc<dyn DocumentsRepo>,
    pub themes: ThemeResolver,
    pub renderers: Arc<RendererRegistry>,
    pub evaluator: Arc<CompositeExpressionEvaluator>,
    pub output: Arc<dyn OutputWriter>,
    pub retention: RetentionPolicy,
}
