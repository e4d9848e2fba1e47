use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quire_jobs_claimed_total",
            Unit::Count,
            "Total number of generation jobs claimed by this instance."
        );
        describe_counter!(
            "quire_jobs_completed_total",
            Unit::Count,
            "Total number of generation jobs completed by this instance."
        );
        describe_counter!(
            "quire_jobs_failed_total",
            Unit::Count,
            "Total number of generation jobs marked failed by this instance."
        );
        describe_counter!(
            "quire_expression_failures_total",
            Unit::Count,
            "Expression evaluations that failed and yielded null, by language."
        );
        describe_gauge!(
            "quire_batch_ema_ms",
            Unit::Milliseconds,
            "Exponential moving average of job duration."
        );
        describe_gauge!(
            "quire_batch_size",
            Unit::Count,
            "Current claim batch size chosen by the adaptive sizer."
        );
        describe_gauge!(
            "quire_jobs_active",
            Unit::Count,
            "Generation jobs currently running in this process."
        );
        describe_histogram!(
            "quire_job_duration_ms",
            Unit::Milliseconds,
            "Wall-clock duration of one generation job."
        );
    });
}
