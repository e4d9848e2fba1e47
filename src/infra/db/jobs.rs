use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{JobCompletion, JobFailure, JobsRepo, RepoError},
    domain::{
        entities::{GenerationJob, NewGenerationJob, VersionSelector, truncate_error_message},
        types::JobStatus,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const JOB_COLUMNS: &str = "id, tenant_id, template_id, variant_id, version_id, environment_id, \
     data, filename, status, claimed_by, claimed_at, started_at, completed_at, expires_at, \
     error_message, document_id, total_count, completed_count, failed_count, created_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    tenant_id: String,
    template_id: String,
    variant_id: String,
    version_id: Option<i32>,
    environment_id: Option<String>,
    data: Value,
    filename: Option<String>,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<OffsetDateTime>,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
    expires_at: Option<OffsetDateTime>,
    error_message: Option<String>,
    document_id: Option<Uuid>,
    total_count: i32,
    completed_count: i32,
    failed_count: i32,
    created_at: OffsetDateTime,
}

impl TryFrom<JobRow> for GenerationJob {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown job status `{}`", row.status))
        })?;

        let target = match (row.version_id, row.environment_id) {
            (Some(version), None) => VersionSelector::Version(version),
            (None, Some(environment)) => VersionSelector::Environment(environment),
            _ => {
                return Err(RepoError::from_persistence(format!(
                    "job `{}` has an ambiguous version target",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            template_id: row.template_id,
            variant_id: row.variant_id,
            target,
            data: row.data,
            filename: row.filename,
            status,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
            error_message: row.error_message,
            document_id: row.document_id,
            total_count: row.total_count,
            completed_count: row.completed_count,
            failed_count: row.failed_count,
            created_at: row.created_at,
        })
    }
}

fn rows_into_jobs(rows: Vec<JobRow>) -> Result<Vec<GenerationJob>, RepoError> {
    rows.into_iter().map(GenerationJob::try_from).collect()
}

#[async_trait]
impl JobsRepo for PostgresRepositories {
    async fn enqueue_job(&self, job: NewGenerationJob) -> Result<Uuid, RepoError> {
        let target = job.target()?;
        let (version_id, environment_id) = match target {
            VersionSelector::Version(version) => (Some(version), None),
            VersionSelector::Environment(environment) => (None, Some(environment)),
        };

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, tenant_id, template_id, variant_id, version_id, environment_id, data, filename, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING')
            "#,
        )
        .bind(id)
        .bind(&job.tenant_id)
        .bind(&job.template_id)
        .bind(&job.variant_id)
        .bind(version_id)
        .bind(environment_id)
        .bind(&job.data)
        .bind(&job.filename)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn claim_pending(
        &self,
        claimant: &str,
        batch_size: u32,
    ) -> Result<Vec<GenerationJob>, RepoError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        // Rows locked by a concurrent claimant are skipped rather than waited on.
        let sql = r#"
            UPDATE generation_jobs AS j
               SET status = 'IN_PROGRESS',
                   claimed_by = $1,
                   claimed_at = now(),
                   started_at = now()
              FROM (
                    SELECT id
                      FROM generation_jobs
                     WHERE status = 'PENDING'
                     ORDER BY created_at ASC, id ASC
                     LIMIT $2
                       FOR UPDATE SKIP LOCKED
                   ) AS picked
             WHERE j.id = picked.id
            RETURNING j.*
            "#;

        let rows = sqlx::query_as::<_, JobRow>(sql)
            .bind(claimant)
            .bind(i64::from(batch_size))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let mut jobs = rows_into_jobs(rows)?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn mark_completed(&self, id: Uuid, completion: JobCompletion) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
               SET status = 'COMPLETED',
                   completed_at = now(),
                   document_id = $2,
                   expires_at = $3,
                   error_message = NULL,
                   completed_count = total_count,
                   failed_count = 0
             WHERE id = $1
               AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(id)
        .bind(completion.document_id)
        .bind(completion.expires_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::conflict(format!(
                "job `{id}` is not in progress"
            )));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, failure: JobFailure) -> Result<(), RepoError> {
        let message = truncate_error_message(&failure.message);
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
               SET status = 'FAILED',
                   completed_at = now(),
                   expires_at = $3,
                   error_message = $2,
                   failed_count = total_count - completed_count
             WHERE id = $1
               AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(id)
        .bind(message)
        .bind(failure.expires_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::conflict(format!(
                "job `{id}` is not in progress"
            )));
        }
        Ok(())
    }

    async fn cancel_job(&self, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
               SET status = 'CANCELLED'
             WHERE id = $1
               AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>, RepoError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(GenerationJob::try_from).transpose()
    }

    async fn list_stale_claims(
        &self,
        older_than: Duration,
    ) -> Result<Vec<GenerationJob>, RepoError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
              FROM generation_jobs
             WHERE status = 'IN_PROGRESS'
               AND claimed_at < now() - make_interval(secs => $1)
             ORDER BY claimed_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(older_than.as_secs_f64())
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows_into_jobs(rows)
    }
}
