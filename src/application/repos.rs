//! Repository traits describing persistence adapters.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::document::TemplateDocument;
use crate::domain::entities::{
    GenerationJob, NewGeneratedDocument, NewGenerationJob, VersionSelector,
};
use crate::domain::error::DomainError;
use crate::domain::theme::Theme;

#[derive(Debug, Error)]
pub enum RepoError {
    /// The store could not complete the operation; callers retry on the next tick.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("conflicting state: {message}")]
    Conflict { message: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Unavailable(_))
    }
}

/// Terminal success details written by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub document_id: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Terminal failure details written by the worker. `message` is already truncated.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub message: String,
    pub expires_at: OffsetDateTime,
}

#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(&self, job: NewGenerationJob) -> Result<Uuid, RepoError>;

    /// Atomically move up to `batch_size` of the oldest pending jobs to `InProgress`
    /// under `claimant`. Concurrent callers never block each other and never
    /// receive the same job. Fewer rows (possibly none) is not an error.
    async fn claim_pending(
        &self,
        claimant: &str,
        batch_size: u32,
    ) -> Result<Vec<GenerationJob>, RepoError>;

    async fn mark_completed(&self, id: Uuid, completion: JobCompletion) -> Result<(), RepoError>;

    async fn mark_failed(&self, id: Uuid, failure: JobFailure) -> Result<(), RepoError>;

    /// Cancel a job that has not been claimed yet. Returns `false` when the job
    /// was already claimed or finished.
    async fn cancel_job(&self, id: Uuid) -> Result<bool, RepoError>;

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>, RepoError>;

    /// In-progress jobs whose claim is older than `older_than`.
    async fn list_stale_claims(&self, older_than: Duration)
    -> Result<Vec<GenerationJob>, RepoError>;
}

/// A template revision together with the theme defaults that apply to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSnapshot {
    pub document: TemplateDocument,
    pub template_default_theme: Option<String>,
    pub tenant_default_theme: Option<String>,
}

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn load_template(
        &self,
        tenant_id: &str,
        template_id: &str,
        variant_id: &str,
        target: &VersionSelector,
    ) -> Result<Option<TemplateSnapshot>, RepoError>;
}

#[async_trait]
pub trait ThemesRepo: Send + Sync {
    async fn find_theme(&self, tenant_id: &str, theme_id: &str)
    -> Result<Option<Theme>, RepoError>;
}

#[async_trait]
pub trait DocumentsRepo: Send + Sync {
    async fn store_document(&self, document: NewGeneratedDocument) -> Result<Uuid, RepoError>;
}
