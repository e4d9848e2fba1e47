//! Fixed-delay claim loop that fans claimed jobs out to independent tasks.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::repos::{JobFailure, JobsRepo, RepoError};
use crate::domain::entities::{GenerationJob, truncate_error_message};

use super::batch_sizer::AdaptiveBatchSizer;
use super::worker::{JobExecutionError, JobExecutor};

pub const METRIC_JOBS_CLAIMED: &str = "quire_jobs_claimed_total";
pub const METRIC_JOBS_COMPLETED: &str = "quire_jobs_completed_total";
pub const METRIC_JOBS_FAILED: &str = "quire_jobs_failed_total";
pub const METRIC_JOBS_ACTIVE: &str = "quire_jobs_active";
pub const METRIC_JOB_DURATION_MS: &str = "quire_job_duration_ms";

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub stale_timeout: Duration,
    pub instance_id: String,
    pub shutdown_grace: Duration,
    /// Retention applied to jobs that end up Failed.
    pub job_retention: time::Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            max_concurrent_jobs: 2,
            stale_timeout: Duration::from_secs(10 * 60),
            instance_id: format!("quire-{}", Uuid::new_v4()),
            shutdown_grace: Duration::from_secs(30),
            job_retention: time::Duration::days(7),
        }
    }
}

/// Process-local bookkeeping shared by the poller and its job tasks.
#[derive(Debug, Default)]
pub struct PollerState {
    active: AtomicUsize,
    started: DashMap<Uuid, Instant>,
}

impl PollerState {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Jobs currently running here, with how long they have been running.
    pub fn running(&self) -> Vec<(Uuid, Duration)> {
        self.started
            .iter()
            .map(|entry| (*entry.key(), entry.value().elapsed()))
            .collect()
    }
}

/// Counts one dispatched job as active until dropped, however the task ends.
struct ActiveJobGuard {
    state: Arc<PollerState>,
    job_id: Uuid,
}

impl ActiveJobGuard {
    fn acquire(state: &Arc<PollerState>, job_id: Uuid) -> Self {
        let active = state.active.fetch_add(1, Ordering::AcqRel) + 1;
        state.started.insert(job_id, Instant::now());
        gauge!(METRIC_JOBS_ACTIVE).set(active as f64);
        Self {
            state: Arc::clone(state),
            job_id,
        }
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.started.remove(&self.job_id);
        let active = self.state.active.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(METRIC_JOBS_ACTIVE).set(active as f64);
    }
}

/// Outcome of one poll tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub claimed: usize,
    pub tasks: Vec<JoinHandle<()>>,
}

pub struct JobPoller {
    settings: PollerSettings,
    state: Arc<PollerState>,
    sizer: Arc<AdaptiveBatchSizer>,
    jobs: Arc<dyn JobsRepo>,
    executor: Arc<dyn JobExecutor>,
}

impl JobPoller {
    pub fn new(
        settings: PollerSettings,
        sizer: Arc<AdaptiveBatchSizer>,
        jobs: Arc<dyn JobsRepo>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            settings,
            state: Arc::new(PollerState::default()),
            sizer,
            jobs,
            executor,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn state(&self) -> &Arc<PollerState> {
        &self.state
    }

    pub fn sizer(&self) -> &Arc<AdaptiveBatchSizer> {
        &self.sizer
    }

    /// Claim as many jobs as the free slots and the batch sizer allow and
    /// spawn one task per job. Does not wait for the tasks.
    pub async fn tick(&self) -> Result<TickReport, RepoError> {
        let active = self.state.active();
        let max = self.settings.max_concurrent_jobs;
        if active >= max {
            return Ok(TickReport::default());
        }
        let slots = max - active;
        let batch = (self.sizer.current_batch_size() as usize).min(slots);
        if batch == 0 {
            return Ok(TickReport::default());
        }

        let claimed = self
            .jobs
            .claim_pending(&self.settings.instance_id, batch as u32)
            .await?;
        if claimed.is_empty() {
            return Ok(TickReport::default());
        }

        counter!(METRIC_JOBS_CLAIMED).increment(claimed.len() as u64);
        debug!(
            target = "application::jobs::poller",
            claimant = %self.settings.instance_id,
            batch,
            claimed = claimed.len(),
            active,
            "claimed jobs"
        );

        let mut report = TickReport {
            claimed: claimed.len(),
            tasks: Vec::with_capacity(claimed.len()),
        };
        for job in claimed {
            let guard = ActiveJobGuard::acquire(&self.state, job.id);
            report.tasks.push(tokio::spawn(run_job(
                job,
                guard,
                Arc::clone(&self.executor),
                Arc::clone(&self.jobs),
                Arc::clone(&self.sizer),
                self.settings.job_retention,
            )));
        }
        Ok(report)
    }

    /// Tick until `shutdown` turns true, sleeping `poll_interval` after each
    /// tick, then wait up to the grace period for running jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target = "application::jobs::poller",
            claimant = %self.settings.instance_id,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            "job poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.tick().await {
                warn!(
                    target = "application::jobs::poller",
                    error = %err,
                    retryable = err.is_retryable(),
                    "claim failed; retrying next tick"
                );
            }
            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let remaining = self.drain(self.settings.shutdown_grace).await;
        info!(
            target = "application::jobs::poller",
            claimant = %self.settings.instance_id,
            abandoned = remaining,
            "job poller stopped"
        );
    }

    /// Wait until no job is active or `grace` elapses. Returns the number of
    /// jobs still running.
    pub async fn drain(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        while self.state.active() > 0 && Instant::now() < deadline {
            sleep(DRAIN_POLL_INTERVAL).await;
        }
        self.state.active()
    }

    /// Jobs claimed longer than the stale timeout ago and still in progress.
    pub async fn stale_claims(&self) -> Result<Vec<GenerationJob>, RepoError> {
        let stale = self
            .jobs
            .list_stale_claims(self.settings.stale_timeout)
            .await?;
        if !stale.is_empty() {
            warn!(
                target = "application::jobs::poller",
                count = stale.len(),
                stale_timeout_secs = self.settings.stale_timeout.as_secs(),
                "stale job claims found"
            );
        }
        Ok(stale)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn run_job(
    job: GenerationJob,
    guard: ActiveJobGuard,
    executor: Arc<dyn JobExecutor>,
    jobs: Arc<dyn JobsRepo>,
    sizer: Arc<AdaptiveBatchSizer>,
    job_retention: time::Duration,
) {
    let _guard = guard;
    let started = Instant::now();
    let outcome = AssertUnwindSafe(executor.execute(&job))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(JobExecutionError::Panicked(panic_message(panic.as_ref()))));

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    sizer.record_completion(elapsed_ms);
    histogram!(METRIC_JOB_DURATION_MS).record(elapsed_ms as f64);

    match outcome {
        Ok(completion) => {
            let document_id = completion.document_id;
            match jobs.mark_completed(job.id, completion).await {
                Ok(()) => {
                    counter!(METRIC_JOBS_COMPLETED).increment(1);
                    info!(
                        target = "application::jobs::poller",
                        job_id = %job.id,
                        tenant = %job.tenant_id,
                        %document_id,
                        elapsed_ms,
                        "job completed"
                    );
                }
                Err(err) => warn!(
                    target = "application::jobs::poller",
                    job_id = %job.id,
                    error = %err,
                    "failed to record job completion"
                ),
            }
        }
        Err(err) => {
            counter!(METRIC_JOBS_FAILED).increment(1);
            warn!(
                target = "application::jobs::poller",
                job_id = %job.id,
                tenant = %job.tenant_id,
                elapsed_ms,
                error = %err,
                "job failed"
            );
            let failure = JobFailure {
                message: truncate_error_message(&err.to_string()),
                expires_at: OffsetDateTime::now_utc() + job_retention,
            };
            if let Err(store_err) = jobs.mark_failed(job.id, failure).await {
                warn!(
                    target = "application::jobs::poller",
                    job_id = %job.id,
                    error = %store_err,
                    "failed to record job failure"
                );
            }
        }
    }
}
