//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use apalis_cron::Schedule;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "firma";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_CACHE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_TOKEN_ISSUER: &str = "firma";
const DEFAULT_ACCESS_TTL_SECS: u64 = 900;
const DEFAULT_REFRESH_TTL_SECS: u64 = 86_400;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_JOB_RENDER_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_SOFT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_JOB_HARD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RENDER_RETRIES: u32 = 5;
const DEFAULT_COUNTER_SYNC_SCHEDULE: &str = "0 */5 * * * *";

/// Command-line arguments for the Firma binary.
#[derive(Debug, Parser)]
#[command(name = "firma", version, about = "Firma account service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FIRMA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and job workers.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the media storage root.
    #[arg(long = "media-root", value_name = "PATH")]
    pub media_root: Option<PathBuf>,

    /// Override the counter cache connection URL.
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,

    /// Override the render worker concurrency.
    #[arg(long = "jobs-render-concurrency", value_name = "COUNT")]
    pub jobs_render_concurrency: Option<u32>,

    /// Override the soft render timeout.
    #[arg(long = "jobs-soft-timeout-seconds", value_name = "SECONDS")]
    pub jobs_soft_timeout_seconds: Option<u64>,

    /// Override the hard render timeout.
    #[arg(long = "jobs-hard-timeout-seconds", value_name = "SECONDS")]
    pub jobs_hard_timeout_seconds: Option<u64>,

    /// Override the render retry budget.
    #[arg(long = "jobs-max-render-retries", value_name = "COUNT")]
    pub jobs_max_render_retries: Option<u32>,

    /// Override the counter sync cron schedule.
    #[arg(long = "jobs-counter-sync-schedule", value_name = "CRON")]
    pub jobs_counter_sync_schedule: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub media: MediaSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
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
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// HMAC secret for token signing. Required to serve; deliberately has no
    /// default.
    pub token_secret: Option<String>,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub render_concurrency: NonZeroU32,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub max_render_retries: i32,
    pub counter_sync_schedule: Schedule,
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

    builder = builder.add_source(Environment::with_prefix("FIRMA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    media: RawMediaSettings,
    cache: RawCacheSettings,
    auth: RawAuthSettings,
    jobs: RawJobsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(max);
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
        if let Some(root) = overrides.media_root.as_ref() {
            self.media.root = Some(root.clone());
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
        if let Some(value) = overrides.jobs_render_concurrency {
            self.jobs.render_concurrency = Some(value);
        }
        if let Some(seconds) = overrides.jobs_soft_timeout_seconds {
            self.jobs.soft_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.jobs_hard_timeout_seconds {
            self.jobs.hard_timeout_seconds = Some(seconds);
        }
        if let Some(value) = overrides.jobs_max_render_retries {
            self.jobs.max_render_retries = Some(value);
        }
        if let Some(schedule) = overrides.jobs_counter_sync_schedule.as_ref() {
            self.jobs.counter_sync_schedule = Some(schedule.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            media,
            cache,
            auth,
            jobs,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let media = build_media_settings(media)?;
        let cache = build_cache_settings(cache)?;
        let auth = build_auth_settings(auth)?;
        let jobs = build_jobs_settings(jobs)?;

        Ok(Self {
            server,
            logging,
            database,
            media,
            cache,
            auth,
            jobs,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let listen = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.listen", reason))?;

    Ok(ServerSettings { listen })
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

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    let http_max_connections = non_zero_u32(http_value.into(), "database.http_max_connections")?;
    let jobs_max_connections = non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?;

    Ok(DatabaseSettings {
        url,
        http_max_connections,
        jobs_max_connections,
    })
}

fn build_media_settings(media: RawMediaSettings) -> Result<MediaSettings, LoadError> {
    let root = media
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("media.root", "path must not be empty"));
    }

    Ok(MediaSettings { root })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let url = cache
        .url
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| DEFAULT_CACHE_URL.to_string());

    Ok(CacheSettings { url })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let token_secret = auth.token_secret.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let issuer = auth
        .issuer
        .unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string());
    if issuer.trim().is_empty() {
        return Err(LoadError::invalid("auth.issuer", "must not be empty"));
    }

    let access_secs = auth.access_ttl_seconds.unwrap_or(DEFAULT_ACCESS_TTL_SECS);
    if access_secs == 0 {
        return Err(LoadError::invalid(
            "auth.access_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let refresh_secs = auth.refresh_ttl_seconds.unwrap_or(DEFAULT_REFRESH_TTL_SECS);
    if refresh_secs <= access_secs {
        return Err(LoadError::invalid(
            "auth.refresh_ttl_seconds",
            "must exceed the access token lifetime",
        ));
    }

    Ok(AuthSettings {
        token_secret,
        issuer,
        access_ttl: Duration::from_secs(access_secs),
        refresh_ttl: Duration::from_secs(refresh_secs),
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let concurrency_value = jobs
        .render_concurrency
        .unwrap_or(DEFAULT_JOB_RENDER_CONCURRENCY);
    let render_concurrency =
        non_zero_u32(concurrency_value.into(), "jobs.render_concurrency")?;

    let soft_secs = jobs
        .soft_timeout_seconds
        .unwrap_or(DEFAULT_JOB_SOFT_TIMEOUT_SECS);
    if soft_secs == 0 {
        return Err(LoadError::invalid(
            "jobs.soft_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let hard_secs = jobs
        .hard_timeout_seconds
        .unwrap_or(DEFAULT_JOB_HARD_TIMEOUT_SECS);
    if hard_secs <= soft_secs {
        return Err(LoadError::invalid(
            "jobs.hard_timeout_seconds",
            "must exceed the soft timeout",
        ));
    }

    let retries_value = jobs
        .max_render_retries
        .unwrap_or(DEFAULT_MAX_RENDER_RETRIES);
    let max_render_retries: i32 = retries_value.try_into().map_err(|_| {
        LoadError::invalid(
            "jobs.max_render_retries",
            "value exceeds supported range for i32",
        )
    })?;

    let schedule_value = jobs
        .counter_sync_schedule
        .unwrap_or_else(|| DEFAULT_COUNTER_SYNC_SCHEDULE.to_string());
    let counter_sync_schedule = Schedule::from_str(schedule_value.as_str()).map_err(|err| {
        LoadError::invalid(
            "jobs.counter_sync_schedule",
            format!("failed to parse cron expression: {err}"),
        )
    })?;

    Ok(JobsSettings {
        render_concurrency,
        soft_timeout: Duration::from_secs(soft_secs),
        hard_timeout: Duration::from_secs(hard_secs),
        max_render_retries,
        counter_sync_schedule,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
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
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMediaSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    token_secret: Option<String>,
    issuer: Option<String>,
    access_ttl_seconds: Option<u64>,
    refresh_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    render_concurrency: Option<u32>,
    soft_timeout_seconds: Option<u64>,
    hard_timeout_seconds: Option<u64>,
    max_render_retries: Option<u32>,
    counter_sync_schedule: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
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
