use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use callup_agent::background_jobs::{create_scheduler, RecordingUploadJob};
use callup_agent::call_log::{
    CallLogProvider, CallLogReader, NullCallLogProvider, SqliteCallLogProvider,
};
use callup_agent::call_state::{
    CallEventSink, CallStateMonitor, JsonLinesSink, LineTelephonyService, TelephonyService,
};
use callup_agent::clock::{Clock, SystemClock};
use callup_agent::config::{self, AppConfig};
use callup_agent::metrics;
use callup_agent::recording::{RecordingMatcher, RecordingScanner};
use callup_agent::state_store::SqliteStateStore;
use callup_agent::upload::{HttpRecordingUploader, UploadTracker};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[clap(version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the agent state database (callup.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Android-schema call log database (calls table).
    #[clap(long, value_parser = parse_path)]
    pub call_log_db: Option<PathBuf>,

    /// Directory to scan for recordings. Repeat for several; replaces the
    /// built-in vendor directory list.
    #[clap(long = "recording-root", value_parser = parse_path)]
    pub recording_roots: Vec<PathBuf>,

    /// Endpoint receiving the multipart uploads.
    #[clap(long)]
    pub upload_url: Option<String>,

    /// Seconds between the end of an upload cycle and the start of the next.
    #[clap(long)]
    pub upload_interval_secs: Option<u64>,

    /// Read call-state changes and emit call events.
    #[clap(long)]
    pub call_state: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            metrics_port: args.metrics_port,
            call_log_db: args.call_log_db.clone(),
            recording_roots: args.recording_roots.clone(),
            upload_url: args.upload_url.clone(),
            upload_interval_secs: args.upload_interval_secs,
            call_state: args.call_state,
        }
    }
}

fn build_call_log_provider(app_config: &AppConfig) -> Arc<dyn CallLogProvider> {
    match &app_config.call_log_db {
        Some(path) => {
            info!("Reading call log from {:?}", path);
            Arc::new(SqliteCallLogProvider::new(path))
        }
        None => {
            info!("No call log database configured, matching by file name only");
            Arc::new(NullCallLogProvider)
        }
    }
}

fn build_call_state_monitor(
    app_config: &AppConfig,
    call_log: Arc<CallLogReader>,
    clock: Arc<dyn Clock>,
) -> Result<CallStateMonitor> {
    let settings = &app_config.call_state;

    let telephony: Arc<dyn TelephonyService> = match &settings.input {
        Some(path) => {
            info!("Reading call state changes from {:?}", path);
            Arc::new(LineTelephonyService::from_path(path))
        }
        None => {
            info!("Reading call state changes from stdin");
            Arc::new(LineTelephonyService::stdin())
        }
    };

    let sink: Arc<dyn CallEventSink> = match &settings.events_output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open call events output {:?}", path))?;
            info!("Writing call events to {:?}", path);
            Arc::new(JsonLinesSink::new(file))
        }
        None => Arc::new(JsonLinesSink::new(std::io::stdout())),
    };

    Ok(CallStateMonitor::new(telephony, call_log, clock, sink))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!(
        "Starting callup-agent {}-{}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  recording roots: {}", app_config.scanner.roots.len());
    info!("  upload url: {}", app_config.upload.url);
    info!("  upload interval: {}s", app_config.upload.interval_secs);

    info!("Initializing metrics...");
    metrics::init_metrics();

    if !app_config.state_db_path().exists() {
        info!(
            "Creating new state database at {:?}",
            app_config.state_db_path()
        );
    }
    let state_store = Arc::new(SqliteStateStore::new(app_config.state_db_path())?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let call_log = Arc::new(CallLogReader::new(
        build_call_log_provider(&app_config),
        clock.clone(),
    ));
    let scanner = Arc::new(RecordingScanner::new(&app_config.scanner, clock.clone())?);
    let matcher = Arc::new(RecordingMatcher::new(
        call_log.clone(),
        app_config.matcher.clone(),
    ));

    let uploader = HttpRecordingUploader::new(
        &app_config.upload,
        state_store.clone(),
        tokio::runtime::Handle::current(),
    )?;

    let tracker = Arc::new(UploadTracker::new(
        scanner,
        matcher,
        Arc::new(uploader),
        state_store.clone(),
        clock.clone(),
    ));

    // Set up background job scheduler
    let shutdown_token = CancellationToken::new();
    let (mut scheduler, hook_sender) =
        create_scheduler(state_store.clone(), shutdown_token.clone());
    scheduler
        .register_job(Arc::new(RecordingUploadJob::new(
            tracker,
            Duration::from_secs(app_config.upload.interval_secs),
            app_config.upload.upload_after_call,
        )))
        .await;
    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );

    let monitor = if app_config.call_state.enabled {
        let monitor = build_call_state_monitor(&app_config, call_log, clock)?
            .with_hook_sender(hook_sender.clone());
        monitor.start()?;
        Some(monitor)
    } else {
        None
    };

    if app_config.metrics_port != 0 {
        let metrics_shutdown = shutdown_token.clone();
        let port = app_config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(port, metrics_shutdown).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating graceful shutdown");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    scheduler.run().await;

    if let Some(monitor) = monitor {
        monitor.stop();
    }
    drop(hook_sender);
    info!("callup-agent stopped");
    Ok(())
}
