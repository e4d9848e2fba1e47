//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

use crate::application::expression::ExpressionLimits;
use crate::application::jobs::{BatchSizerConfig, PollerSettings, RetentionPolicy};
use crate::application::output::OutputSettings;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quire";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MAX_CONCURRENT_JOBS: u32 = 2;
const DEFAULT_STALE_TIMEOUT_MINUTES: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
const DEFAULT_JOB_RETENTION_DAYS: u32 = 7;
const DEFAULT_DOCUMENT_RETENTION_DAYS: u32 = 30;
const DEFAULT_FONT_CACHE_CAPACITY: u32 = 16;

/// Command-line arguments for the quire binary.
#[derive(Debug, Parser)]
#[command(name = "quire", version, about = "Document generation worker")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Claim and render generation jobs until interrupted.
    Serve(Box<ServeArgs>),
    /// Render a template document file to a PDF without a database.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct OutputOverrides {
    /// Produce archival (PDF/A-2b) output.
    #[arg(
        long = "output-archival",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub archival: Option<bool>,

    /// Directory holding `<family>.ttf` and `<family>-Bold.ttf` font files.
    #[arg(long = "output-font-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub font_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub output: OutputOverrides,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Apply pending migrations before starting.
    #[arg(
        long = "database-run-migrations",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub run_migrations: Option<bool>,

    /// Override the delay between poll ticks.
    #[arg(long = "poller-poll-interval-ms", value_name = "MILLIS")]
    pub poll_interval_ms: Option<u64>,

    /// Override the number of jobs run at once by this instance.
    #[arg(long = "poller-max-concurrent-jobs", value_name = "COUNT")]
    pub max_concurrent_jobs: Option<u32>,

    /// Override the claimant identity written to claimed jobs.
    #[arg(long = "poller-instance-id", value_name = "ID")]
    pub instance_id: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub output: OutputOverrides,

    /// Template document JSON file.
    #[arg(value_name = "TEMPLATE", value_hint = ValueHint::FilePath)]
    pub template: PathBuf,

    /// JSON file with the data the template is rendered against.
    #[arg(long = "data", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: Option<PathBuf>,

    /// JSON file with the theme to apply.
    #[arg(long = "theme", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub theme: Option<PathBuf>,

    /// Where to write the PDF.
    #[arg(short = 'o', long = "output", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output_file: PathBuf,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub poller: PollerSettings,
    pub adaptive_batch: BatchSizerConfig,
    pub retention: RetentionPolicy,
    pub expression: ExpressionLimits,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub run_migrations: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUIRE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => {
            raw.apply_logging_overrides(&args.logging);
            raw.apply_output_overrides(&args.output);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    poller: RawPollerSettings,
    adaptive_batch: RawAdaptiveBatchSettings,
    retention: RawRetentionSettings,
    expression: RawExpressionSettings,
    output: RawOutputSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_logging_overrides(&overrides.logging);
        self.apply_output_overrides(&overrides.output);

        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(run) = overrides.run_migrations {
            self.database.run_migrations = Some(run);
        }
        if let Some(interval) = overrides.poll_interval_ms {
            self.poller.poll_interval_ms = Some(interval);
        }
        if let Some(max) = overrides.max_concurrent_jobs {
            self.poller.max_concurrent_jobs = Some(max);
        }
        if let Some(id) = overrides.instance_id.as_ref() {
            self.poller.instance_id = Some(id.clone());
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_output_overrides(&mut self, overrides: &OutputOverrides) {
        if let Some(archival) = overrides.archival {
            self.output.archival = Some(archival);
        }
        if let Some(dir) = overrides.font_dir.as_ref() {
            self.output.font_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            poller,
            adaptive_batch,
            retention,
            expression,
            output,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let adaptive_batch = build_adaptive_batch_settings(adaptive_batch)?;
        let retention = build_retention_settings(retention)?;
        let poller = build_poller_settings(poller, &retention)?;
        let expression = build_expression_settings(expression)?;
        let output = build_output_settings(output)?;

        Ok(Self {
            logging,
            database,
            poller,
            adaptive_batch,
            retention,
            expression,
            output,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        run_migrations: database.run_migrations.unwrap_or(false),
    })
}

fn build_poller_settings(
    poller: RawPollerSettings,
    retention: &RetentionPolicy,
) -> Result<PollerSettings, LoadError> {
    let poll_interval_ms = poller.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if poll_interval_ms == 0 {
        return Err(LoadError::invalid(
            "poller.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    let max_concurrent_jobs = non_zero_u32(
        poller
            .max_concurrent_jobs
            .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS)
            .into(),
        "poller.max_concurrent_jobs",
    )?;

    let stale_minutes = poller
        .stale_timeout_minutes
        .unwrap_or(DEFAULT_STALE_TIMEOUT_MINUTES);
    if stale_minutes == 0 {
        return Err(LoadError::invalid(
            "poller.stale_timeout_minutes",
            "must be greater than zero",
        ));
    }

    let instance_id = match poller.instance_id {
        Some(id) if id.trim().is_empty() => {
            return Err(LoadError::invalid(
                "poller.instance_id",
                "must not be blank",
            ));
        }
        Some(id) => id.trim().to_string(),
        None => default_instance_id(),
    };

    Ok(PollerSettings {
        poll_interval: Duration::from_millis(poll_interval_ms),
        max_concurrent_jobs: max_concurrent_jobs.get() as usize,
        stale_timeout: Duration::from_secs(stale_minutes * 60),
        instance_id,
        shutdown_grace: Duration::from_secs(
            poller
                .shutdown_grace_seconds
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        ),
        job_retention: retention.job,
    })
}

/// `<hostname>-<pid>-<uuid>`; the hostname comes from the environment when set.
fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| "quire".to_string());
    format!("{host}-{}-{}", std::process::id(), Uuid::new_v4().simple())
}

fn build_adaptive_batch_settings(
    batch: RawAdaptiveBatchSettings,
) -> Result<BatchSizerConfig, LoadError> {
    let defaults = BatchSizerConfig::default();
    let config = BatchSizerConfig {
        min_batch_size: batch.min_batch_size.unwrap_or(defaults.min_batch_size),
        max_batch_size: batch.max_batch_size.unwrap_or(defaults.max_batch_size),
        fast_threshold_ms: batch.fast_threshold_ms.unwrap_or(defaults.fast_threshold_ms),
        slow_threshold_ms: batch.slow_threshold_ms.unwrap_or(defaults.slow_threshold_ms),
    };
    config
        .validate()
        .map_err(|err| LoadError::invalid("adaptive_batch", err.to_string()))?;
    Ok(config)
}

fn build_retention_settings(retention: RawRetentionSettings) -> Result<RetentionPolicy, LoadError> {
    let job_days = non_zero_u32(
        retention.job_days.unwrap_or(DEFAULT_JOB_RETENTION_DAYS).into(),
        "retention.job_days",
    )?;
    let document_days = non_zero_u32(
        retention
            .document_days
            .unwrap_or(DEFAULT_DOCUMENT_RETENTION_DAYS)
            .into(),
        "retention.document_days",
    )?;

    Ok(RetentionPolicy {
        job: time::Duration::days(i64::from(job_days.get())),
        document: time::Duration::days(i64::from(document_days.get())),
    })
}

fn build_expression_settings(
    expression: RawExpressionSettings,
) -> Result<ExpressionLimits, LoadError> {
    let defaults = ExpressionLimits::default();
    let limits = ExpressionLimits {
        query_max_steps: expression.query_max_steps.unwrap_or(defaults.query_max_steps),
        query_max_depth: expression.query_max_depth.unwrap_or(defaults.query_max_depth),
        script_max_operations: expression
            .script_max_operations
            .unwrap_or(defaults.script_max_operations),
        script_max_call_depth: expression
            .script_max_call_depth
            .unwrap_or(defaults.script_max_call_depth),
        script_timeout_ms: expression
            .script_timeout_ms
            .unwrap_or(defaults.script_timeout_ms),
    };

    for (key, value) in [
        ("expression.query_max_steps", limits.query_max_steps as u64),
        ("expression.query_max_depth", limits.query_max_depth as u64),
        ("expression.script_max_operations", limits.script_max_operations),
        (
            "expression.script_max_call_depth",
            limits.script_max_call_depth as u64,
        ),
        ("expression.script_timeout_ms", limits.script_timeout_ms),
    ] {
        if value == 0 {
            return Err(LoadError::invalid(key, "must be greater than zero"));
        }
    }

    Ok(limits)
}

fn build_output_settings(output: RawOutputSettings) -> Result<OutputSettings, LoadError> {
    let font_dir = output
        .font_dir
        .filter(|dir| !dir.as_os_str().is_empty());
    let font_cache_capacity = non_zero_u32(
        output
            .font_cache_capacity
            .unwrap_or(DEFAULT_FONT_CACHE_CAPACITY)
            .into(),
        "output.font_cache_capacity",
    )?;

    Ok(OutputSettings {
        archival: output.archival.unwrap_or(false),
        font_dir,
        font_cache_capacity: font_cache_capacity.get() as usize,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    run_migrations: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPollerSettings {
    poll_interval_ms: Option<u64>,
    max_concurrent_jobs: Option<u32>,
    stale_timeout_minutes: Option<u64>,
    instance_id: Option<String>,
    shutdown_grace_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdaptiveBatchSettings {
    min_batch_size: Option<u32>,
    max_batch_size: Option<u32>,
    fast_threshold_ms: Option<u64>,
    slow_threshold_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetentionSettings {
    job_days: Option<u32>,
    document_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExpressionSettings {
    query_max_steps: Option<usize>,
    query_max_depth: Option<usize>,
    script_max_operations: Option<u64>,
    script_max_call_depth: Option<usize>,
    script_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOutputSettings {
    archival: Option<bool>,
    font_dir: Option<PathBuf>,
    font_cache_capacity: Option<u32>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
