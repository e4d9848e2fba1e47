use std::{path::Path, process, sync::Arc};

use quire::{
    application::{
        error::AppError,
        expression::CompositeExpressionEvaluator,
        jobs::{
            AdaptiveBatchSizer, DocumentGenerationExecutor, JobPoller, JobWorkerContext,
            render_to_output,
        },
        output::PdfOutputWriter,
        render::RendererRegistry,
        theme::{ThemeResolver, merge_styles},
    },
    config,
    domain::{document::TemplateDocument, theme::Theme},
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::watch, task};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report().render();
    if dispatcher::has_been_set() {
        error!(error = %report, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url is required to serve"))?;
    let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    if settings.database.run_migrations {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| InfraError::migration(err.to_string()))?;
        info!(target = "quire::serve", "database migrations applied");
    }
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let sizer = Arc::new(AdaptiveBatchSizer::new(settings.adaptive_batch)?);
    let context = JobWorkerContext {
        templates: repositories.clone(),
        documents: repositories.clone(),
        themes: ThemeResolver::new(repositories.clone()),
        renderers: Arc::new(RendererRegistry::with_builtins()),
        evaluator: Arc::new(CompositeExpressionEvaluator::with_limits(settings.expression)),
        output: Arc::new(PdfOutputWriter::new(&settings.output)),
        retention: settings.retention,
    };
    let poller = JobPoller::new(
        settings.poller.clone(),
        sizer,
        repositories,
        Arc::new(DocumentGenerationExecutor::new(context)),
    );

    if let Err(err) = poller.stale_claims().await {
        warn!(
            target = "quire::serve",
            error = %err,
            "could not inspect stale claims"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(target = "quire::serve", "shutdown requested"),
            Err(err) => warn!(
                target = "quire::serve",
                error = %err,
                "failed to listen for ctrl-c; shutting down"
            ),
        }
        let _ = shutdown_tx.send(true);
    });

    poller.run(shutdown_rx).await;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| InfraError::file(path, err))?;
    serde_json::from_slice(&bytes).map_err(|err| {
        AppError::validation(format!("failed to parse `{}`: {err}", path.display()))
    })
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let document: TemplateDocument = read_json(&args.template).await?;
    let data: Value = match args.data.as_deref() {
        Some(path) => read_json(path).await?,
        None => Value::Object(Default::default()),
    };
    let theme: Option<Theme> = match args.theme.as_deref() {
        Some(path) => Some(read_json(path).await?),
        None => None,
    };
    let styles = merge_styles(theme, &document.document_styles);

    let renderers = RendererRegistry::with_builtins();
    let evaluator = CompositeExpressionEvaluator::with_limits(settings.expression);
    let output = PdfOutputWriter::new(&settings.output);
    let rendered = task::spawn_blocking(move || {
        render_to_output(&document, &data, &styles, &renderers, &evaluator, &output)
    })
    .await
    .map_err(|err| AppError::unexpected(format!("render task failed: {err}")))??;

    tokio::fs::write(&args.output_file, &rendered.bytes)
        .await
        .map_err(|err| InfraError::file(&args.output_file, err))?;
    info!(
        target = "quire::render",
        path = %args.output_file.display(),
        size_bytes = rendered.size_bytes,
        archival = settings.output.archival,
        "document written"
    );
    Ok(())
}
