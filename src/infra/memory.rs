//! Process-local repository implementation.
//!
//! Mirrors the Postgres adapter closely enough for the poller, the worker and
//! the `render` tooling to run without a database: claims are oldest-first and
//! a job is handed to at most one claimant.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        DocumentsRepo, JobCompletion, JobFailure, JobsRepo, RepoError, TemplateCatalog,
        TemplateSnapshot, ThemesRepo,
    },
    domain::{
        document::TemplateDocument,
        entities::{
            GenerationJob, NewGeneratedDocument, NewGenerationJob, VersionSelector,
            truncate_error_message,
        },
        theme::Theme,
        types::JobStatus,
    },
    util::lock::mutex_lock,
};

const SOURCE: &str = "infra::memory";

/// A document persisted by [`InMemoryRepositories::store_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: Uuid,
    pub document: NewGeneratedDocument,
}

type VariantKey = (String, String, String);

#[derive(Default)]
struct State {
    // Insertion order doubles as creation order.
    jobs: Vec<GenerationJob>,
    versions: HashMap<VariantKey, HashMap<i32, TemplateDocument>>,
    activations: HashMap<VariantKey, HashMap<String, i32>>,
    template_defaults: HashMap<(String, String), String>,
    tenant_defaults: HashMap<String, String>,
    themes: HashMap<(String, String), Theme>,
    documents: Vec<StoredDocument>,
}

#[derive(Default)]
pub struct InMemoryRepositories {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`RepoError::Unavailable`] until reset.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn insert_template_version(
        &self,
        tenant_id: &str,
        template_id: &str,
        variant_id: &str,
        version: i32,
        document: TemplateDocument,
    ) {
        let mut state = mutex_lock(&self.state, SOURCE, "insert_template_version");
        state
            .versions
            .entry(variant_key(tenant_id, template_id, variant_id))
            .or_default()
            .insert(version, document);
    }

    pub fn activate(
        &self,
        tenant_id: &str,
        template_id: &str,
        variant_id: &str,
        environment_id: &str,
        version: i32,
    ) {
        let mut state = mutex_lock(&self.state, SOURCE, "activate");
        state
            .activations
            .entry(variant_key(tenant_id, template_id, variant_id))
            .or_default()
            .insert(environment_id.to_string(), version);
    }

    pub fn set_template_default_theme(&self, tenant_id: &str, template_id: &str, theme_id: &str) {
        let mut state = mutex_lock(&self.state, SOURCE, "set_template_default_theme");
        state.template_defaults.insert(
            (tenant_id.to_string(), template_id.to_string()),
            theme_id.to_string(),
        );
    }

    pub fn set_tenant_default_theme(&self, tenant_id: &str, theme_id: &str) {
        let mut state = mutex_lock(&self.state, SOURCE, "set_tenant_default_theme");
        state
            .tenant_defaults
            .insert(tenant_id.to_string(), theme_id.to_string());
    }

    pub fn insert_theme(&self, tenant_id: &str, theme: Theme) {
        let mut state = mutex_lock(&self.state, SOURCE, "insert_theme");
        state
            .themes
            .insert((tenant_id.to_string(), theme.id.clone()), theme);
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        mutex_lock(&self.state, SOURCE, "documents").documents.clone()
    }

    pub fn jobs(&self) -> Vec<GenerationJob> {
        mutex_lock(&self.state, SOURCE, "jobs").jobs.clone()
    }

    fn ensure_online(&self) -> Result<(), RepoError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::unavailable("in-memory store is offline"));
        }
        Ok(())
    }

    fn finish(
        &self,
        id: Uuid,
        op: &'static str,
        apply: impl FnOnce(&mut GenerationJob),
    ) -> Result<(), RepoError> {
        self.ensure_online()?;
        let mut state = mutex_lock(&self.state, SOURCE, op);
        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(RepoError::NotFound)?;
        if job.status != JobStatus::InProgress {
            return Err(RepoError::conflict(format!("job `{id}` is not in progress")));
        }
        apply(job);
        Ok(())
    }
}

fn variant_key(tenant_id: &str, template_id: &str, variant_id: &str) -> VariantKey {
    (
        tenant_id.to_string(),
        template_id.to_string(),
        variant_id.to_string(),
    )
}

#[async_trait]
impl JobsRepo for InMemoryRepositories {
    async fn enqueue_job(&self, job: NewGenerationJob) -> Result<Uuid, RepoError> {
        self.ensure_online()?;
        let target = job.target()?;
        let id = Uuid::new_v4();
        let record = GenerationJob {
            id,
            tenant_id: job.tenant_id,
            template_id: job.template_id,
            variant_id: job.variant_id,
            target,
            data: job.data,
            filename: job.filename,
            status: JobStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            expires_at: None,
            error_message: None,
            document_id: None,
            total_count: 1,
            completed_count: 0,
            failed_count: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        mutex_lock(&self.state, SOURCE, "enqueue_job")
            .jobs
            .push(record);
        Ok(id)
    }

    async fn claim_pending(
        &self,
        claimant: &str,
        batch_size: u32,
    ) -> Result<Vec<GenerationJob>, RepoError> {
        self.ensure_online()?;
        let now = OffsetDateTime::now_utc();
        let mut state = mutex_lock(&self.state, SOURCE, "claim_pending");
        let claimed = state
            .jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Pending)
            .take(batch_size as usize)
            .map(|job| {
                job.status = JobStatus::InProgress;
                job.claimed_by = Some(claimant.to_string());
                job.claimed_at = Some(now);
                job.started_at = Some(now);
                job.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid, completion: JobCompletion) -> Result<(), RepoError> {
        self.finish(id, "mark_completed", |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(OffsetDateTime::now_utc());
            job.document_id = Some(completion.document_id);
            job.expires_at = Some(completion.expires_at);
            job.error_message = None;
            job.completed_count = job.total_count;
            job.failed_count = 0;
        })
    }

    async fn mark_failed(&self, id: Uuid, failure: JobFailure) -> Result<(), RepoError> {
        self.finish(id, "mark_failed", |job| {
            job.status = JobStatus::Failed;
            job.completed_at = Some(OffsetDateTime::now_utc());
            job.expires_at = Some(failure.expires_at);
            job.error_message = Some(truncate_error_message(&failure.message));
            job.failed_count = job.total_count - job.completed_count;
        })
    }

    async fn cancel_job(&self, id: Uuid) -> Result<bool, RepoError> {
        self.ensure_online()?;
        let mut state = mutex_lock(&self.state, SOURCE, "cancel_job");
        match state.jobs.iter_mut().find(|job| job.id == id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepoError::NotFound),
        }
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>, RepoError> {
        self.ensure_online()?;
        let state = mutex_lock(&self.state, SOURCE, "find_job");
        Ok(state.jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn list_stale_claims(
        &self,
        older_than: Duration,
    ) -> Result<Vec<GenerationJob>, RepoError> {
        self.ensure_online()?;
        let now = OffsetDateTime::now_utc();
        let state = mutex_lock(&self.state, SOURCE, "list_stale_claims");
        let mut stale: Vec<GenerationJob> = state
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::InProgress)
            .filter(|job| {
                job.claim_age(now)
                    .is_some_and(|age| age > older_than)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.claimed_at);
        Ok(stale)
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryRepositories {
    async fn load_template(
        &self,
        tenant_id: &str,
        template_id: &str,
        variant_id: &str,
        target: &VersionSelector,
    ) -> Result<Option<TemplateSnapshot>, RepoError> {
        self.ensure_online()?;
        let state = mutex_lock(&self.state, SOURCE, "load_template");
        let key = variant_key(tenant_id, template_id, variant_id);

        let version = match target {
            VersionSelector::Version(version) => Some(*version),
            VersionSelector::Environment(environment) => state
                .activations
                .get(&key)
                .and_then(|activations| activations.get(environment))
                .copied(),
        };
        let Some(document) = version.and_then(|version| {
            state
                .versions
                .get(&key)
                .and_then(|versions| versions.get(&version))
        }) else {
            return Ok(None);
        };

        Ok(Some(TemplateSnapshot {
            document: document.clone(),
            template_default_theme: state
                .template_defaults
                .get(&(tenant_id.to_string(), template_id.to_string()))
                .cloned(),
            tenant_default_theme: state.tenant_defaults.get(tenant_id).cloned(),
        }))
    }
}

#[async_trait]
impl ThemesRepo for InMemoryRepositories {
    async fn find_theme(
        &self,
        tenant_id: &str,
        theme_id: &str,
    ) -> Result<Option<Theme>, RepoError> {
        self.ensure_online()?;
        let state = mutex_lock(&self.state, SOURCE, "find_theme");
        Ok(state
            .themes
            .get(&(tenant_id.to_string(), theme_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl DocumentsRepo for InMemoryRepositories {
    async fn store_document(&self, document: NewGeneratedDocument) -> Result<Uuid, RepoError> {
        self.ensure_online()?;
        let id = Uuid::new_v4();
        mutex_lock(&self.state, SOURCE, "store_document")
            .documents
            .push(StoredDocument { id, document });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    fn pending(version: i32) -> NewGenerationJob {
        NewGenerationJob {
            tenant_id: "acme".into(),
            template_id: "invoice".into(),
            variant_id: "default".into(),
            version_id: Some(version),
            environment_id: None,
            data: json!({}),
            filename: None,
        }
    }

    #[tokio::test]
    async fn claim_returns_min_of_batch_and_available() {
        let store = InMemoryRepositories::new();
        for version in 0..3 {
            store.enqueue_job(pending(version)).await.unwrap();
        }

        let first = store.claim_pending("a", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = store.claim_pending("b", 5).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(store.claim_pending("c", 5).await.unwrap().is_empty());
        assert!(store.claim_pending("c", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claims_are_oldest_first_and_disjoint() {
        let store = InMemoryRepositories::new();
        let mut ids = Vec::new();
        for version in 0..6 {
            ids.push(store.enqueue_job(pending(version)).await.unwrap());
        }

        let a = store.claim_pending("a", 3).await.unwrap();
        let b = store.claim_pending("b", 3).await.unwrap();

        let a_ids: Vec<Uuid> = a.iter().map(|job| job.id).collect();
        assert_eq!(a_ids, ids[..3].to_vec());
        let a_set: HashSet<Uuid> = a_ids.into_iter().collect();
        assert!(b.iter().all(|job| !a_set.contains(&job.id)));
        assert!(a.iter().chain(&b).all(|job| {
            job.status == JobStatus::InProgress && job.claimant_consistent()
        }));
    }

    #[tokio::test]
    async fn cancel_only_affects_pending_jobs() {
        let store = InMemoryRepositories::new();
        let first = store.enqueue_job(pending(1)).await.unwrap();
        let second = store.enqueue_job(pending(2)).await.unwrap();
        store.claim_pending("a", 1).await.unwrap();

        assert!(!store.cancel_job(first).await.unwrap());
        assert!(store.cancel_job(second).await.unwrap());
        assert!(store.claim_pending("a", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_updates_require_in_progress() {
        let store = InMemoryRepositories::new();
        let id = store.enqueue_job(pending(1)).await.unwrap();
        let failure = JobFailure {
            message: "boom".into(),
            expires_at: OffsetDateTime::now_utc(),
        };

        let err = store.mark_failed(id, failure.clone()).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict { .. }));

        store.claim_pending("a", 1).await.unwrap();
        store.mark_failed(id, failure.clone()).await.unwrap();
        let job = store.find_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(store.mark_failed(id, failure).await.is_err());
    }

    #[tokio::test]
    async fn offline_store_is_retryable() {
        let store = InMemoryRepositories::new();
        store.set_offline(true);
        let err = store.claim_pending("a", 1).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn environment_targets_follow_activation() {
        let store = InMemoryRepositories::new();
        let document: TemplateDocument = serde_json::from_value(json!({"root": "r"})).unwrap();
        store.insert_template_version("acme", "invoice", "default", 4, document.clone());
        store.activate("acme", "invoice", "default", "production", 4);
        store.set_tenant_default_theme("acme", "house");

        let snapshot = store
            .load_template(
                "acme",
                "invoice",
                "default",
                &VersionSelector::Environment("production".into()),
            )
            .await
            .unwrap()
            .expect("activated version resolves");
        assert_eq!(snapshot.document, document);
        assert_eq!(snapshot.tenant_default_theme.as_deref(), Some("house"));
        assert_eq!(snapshot.template_default_theme, None);

        let missing = store
            .load_template(
                "acme",
                "invoice",
                "default",
                &VersionSelector::Environment("staging".into()),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
