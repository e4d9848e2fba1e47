mod batch_sizer;
mod context;
mod poller;
mod queue;
mod worker;

pub use batch_sizer::{
    AdaptiveBatchSizer, BatchAdjustment, BatchSizerConfig, BatchSizerError, EMA_ALPHA,
};
pub use context::{JobWorkerContext, RetentionPolicy};
pub use poller::{
    JobPoller, METRIC_JOB_DURATION_MS, METRIC_JOBS_ACTIVE, METRIC_JOBS_CLAIMED,
    METRIC_JOBS_COMPLETED, METRIC_JOBS_FAILED, PollerSettings, PollerState, TickReport,
};
pub use queue::{enqueue_job, wait_for_job_completion};
pub use worker::{DocumentGenerationExecutor, JobExecutionError, JobExecutor, render_to_output};
