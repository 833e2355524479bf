use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use firma::{
    application::{
        accounts::AccountService,
        cache::ProfileCache,
        error::AppError,
        jobs::{
            JobWorkerContext, SyncProfileCountersContext, process_render_pdf_job,
            process_sync_profile_counters_job,
        },
        pdf::{DocumentRenderer, PdfWorkflow, RetryPolicy},
        profile::ProfileService,
        repos::{JobsRepo, ProfilesRepo, RetriesRepo, UsersRepo},
        signatures::SignatureService,
        tokens::TokenService,
    },
    config,
    domain::types::JobType,
    infra::{
        cache::RedisProfileCache,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        media::MediaStorage,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
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
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(
        http_repositories.clone(),
        job_repositories.clone(),
        &settings,
    )?;

    let monitor_handle = spawn_job_monitor(
        job_repositories,
        app.job_context,
        app.sync_context,
        &settings.jobs,
    );

    let result = serve_http(&settings, app.state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    // The queue schema lives alongside our own tables but is owned by apalis.
    PostgresStorage::setup(&jobs_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

struct ApplicationContext {
    state: AppState,
    job_context: JobWorkerContext,
    sync_context: SyncProfileCountersContext,
}

fn build_application_context(
    http_repositories: Arc<PostgresRepositories>,
    job_repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let users_repo: Arc<dyn UsersRepo> = http_repositories.clone();
    let profiles_repo: Arc<dyn ProfilesRepo> = http_repositories.clone();
    let jobs_repo: Arc<dyn JobsRepo> = http_repositories.clone();
    let retries_repo: Arc<dyn RetriesRepo> = http_repositories.clone();

    let media = Arc::new(
        MediaStorage::new(settings.media.root.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let profile_cache: Arc<dyn ProfileCache> =
        Arc::new(RedisProfileCache::new(&settings.cache.url).map_err(AppError::from)?);

    let token_secret = settings
        .auth
        .token_secret
        .as_deref()
        .ok_or_else(|| InfraError::configuration("auth token secret is not configured"))
        .map_err(AppError::from)?;
    let tokens = Arc::new(TokenService::new(
        token_secret,
        settings.auth.issuer.clone(),
        settings.auth.access_ttl,
        settings.auth.refresh_ttl,
    ));

    let accounts = Arc::new(AccountService::new(users_repo.clone(), tokens.clone()));
    let profiles = Arc::new(ProfileService::new(
        profiles_repo.clone(),
        profile_cache.clone(),
    ));
    let signatures = Arc::new(SignatureService::new(users_repo.clone(), media.clone()));
    let pdf = Arc::new(PdfWorkflow::new(
        users_repo,
        jobs_repo,
        retries_repo,
        media.clone(),
        RetryPolicy::new(settings.jobs.max_render_retries),
    ));

    let state = AppState {
        accounts,
        profiles,
        signatures,
        pdf,
        tokens,
    };

    let job_context = JobWorkerContext {
        repositories: job_repositories.clone(),
        renderer: Arc::new(DocumentRenderer::new(media)),
        soft_timeout: settings.jobs.soft_timeout,
        hard_timeout: settings.jobs.hard_timeout,
    };

    let job_profiles_repo: Arc<dyn ProfilesRepo> = job_repositories;
    let sync_context = SyncProfileCountersContext {
        profiles: job_profiles_repo,
        cache: profile_cache,
    };

    Ok(ApplicationContext {
        state,
        job_context,
        sync_context,
    })
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    job_context: JobWorkerContext,
    sync_context: SyncProfileCountersContext,
    jobs: &config::JobsSettings,
) -> tokio::task::JoinHandle<()> {
    let render_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobType::RenderPdf.as_str()),
    );

    let render_concurrency = jobs.render_concurrency.get() as usize;

    let render_pdf_worker = WorkerBuilder::new("render-pdf-worker")
        .concurrency(render_concurrency)
        .data(job_context)
        .backend(render_storage)
        .build_fn(process_render_pdf_job);

    let sync_counters_worker = WorkerBuilder::new("sync-profile-counters-worker")
        .data(sync_context)
        .backend(CronStream::new(jobs.counter_sync_schedule.clone()))
        .build_fn(process_sync_profile_counters_job);

    let monitor = Monitor::new()
        .register(render_pdf_worker)
        .register(sync_counters_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.listen)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "firma::server",
        addr = %settings.server.listen,
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
