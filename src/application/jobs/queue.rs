use std::time::Duration;

use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::{
    application::repos::{JobsRepo, RepoError},
    domain::entities::{GenerationJob, NewGenerationJob},
};

const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Validate and enqueue a pending generation job, returning its id.
pub async fn enqueue_job<J>(repo: &J, job: NewGenerationJob) -> Result<Uuid, RepoError>
where
    J: JobsRepo + ?Sized,
{
    job.target()?;
    if !(job.data.is_object() || job.data.is_null()) {
        return Err(RepoError::InvalidInput {
            message: "job data must be a JSON object".to_string(),
        });
    }
    repo.enqueue_job(job).await
}

/// Block until the job reaches a terminal status or the timeout elapses,
/// returning the final job snapshot.
pub async fn wait_for_job_completion<J>(
    repo: &J,
    job_id: Uuid,
    timeout: Duration,
) -> Result<GenerationJob, RepoError>
where
    J: JobsRepo + ?Sized,
{
    let deadline = Instant::now() + timeout;

    loop {
        let job = repo.find_job(job_id).await?.ok_or(RepoError::NotFound)?;

        if job.status.is_terminal() {
            return Ok(job);
        }
        if Instant::now() >= deadline {
            return Err(RepoError::conflict(format!(
                "job `{job_id}` still {} after {timeout:?}",
                job.status.as_str()
            )));
        }

        sleep(DEFAULT_WAIT_POLL_INTERVAL).await;
    }
}
