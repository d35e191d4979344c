use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use callup_agent::call_log::{
    CallLogProvider, CallLogReader, NullCallLogProvider, SqliteCallLogProvider,
};
use callup_agent::clock::{Clock, SystemClock};
use callup_agent::config::{self, AppConfig};
use callup_agent::recording::{RecordingLocator, RecordingMatcher, RecordingScanner};
use callup_agent::state_store::{CredentialStore, SqliteStateStore, UploadRecordStore};
use callup_agent::upload::{HttpRecordingUploader, UploadTracker};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn get_styles() -> Styles {
    let header = Style::new()
        .bold()
        .underline()
        .fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
    Styles::styled()
        .usage(header)
        .header(header)
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    config: Option<PathBuf>,

    /// Directory holding the agent state database (callup.db).
    #[clap(long, value_parser = parse_path, default_value = ".")]
    db_dir: PathBuf,

    /// Android-schema call log database (calls table).
    #[clap(long, value_parser = parse_path)]
    call_log_db: Option<PathBuf>,

    /// Directory to scan for recordings. Repeat for several.
    #[clap(long = "recording-root", value_parser = parse_path)]
    recording_roots: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists recordings modified in the last day, or in the given range.
    Scan {
        /// Every recording regardless of age.
        #[clap(long, conflicts_with = "since_ms")]
        all: bool,
        /// Only recordings modified at or after this epoch millisecond.
        #[clap(long)]
        since_ms: Option<i64>,
    },

    /// Pairs the last day's recordings with call log entries.
    Match,

    /// Tells whether any recording belongs to the given number.
    HasRecording { phone_number: String },

    /// Shows the newest recording of the given number.
    Latest { phone_number: String },

    /// Start and end of the newest outgoing call to the given number.
    CallTimes { phone_number: String },

    /// Duration of the newest outgoing call.
    LastDuration,

    /// Inspects or edits the upload records.
    Uploads {
        #[command(subcommand)]
        command: UploadsCommand,
    },

    /// Manages the bearer token used for uploads.
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Runs one scan, match and upload cycle now.
    UploadOnce,
}

#[derive(Subcommand, Debug)]
enum UploadsCommand {
    /// Most recent uploads first.
    List {
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
    /// Forgets one upload so the file is uploaded again.
    Forget { file_path: String },
    /// Forgets every upload.
    Clear,
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    Set { token: String },
    Clear,
    /// Prints whether a token is stored, masked.
    Show,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenStatus {
    present: bool,
    masked: Option<String>,
}

fn mask_token(token: &str) -> String {
    let visible: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", visible)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Components {
    app_config: AppConfig,
    clock: Arc<dyn Clock>,
    call_log: Arc<CallLogReader>,
    scanner: Arc<RecordingScanner>,
}

impl Components {
    fn build(args: &CliArgs) -> Result<Self> {
        let file_config = match &args.config {
            Some(path) => Some(config::FileConfig::load(path)?),
            None => None,
        };
        let cli_config = config::CliConfig {
            db_dir: Some(args.db_dir.clone()),
            metrics_port: 0,
            call_log_db: args.call_log_db.clone(),
            recording_roots: args.recording_roots.clone(),
            ..Default::default()
        };
        let app_config = AppConfig::resolve(&cli_config, file_config)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let provider: Arc<dyn CallLogProvider> = match &app_config.call_log_db {
            Some(path) => Arc::new(SqliteCallLogProvider::new(path)),
            None => Arc::new(NullCallLogProvider),
        };
        let call_log = Arc::new(CallLogReader::new(provider, clock.clone()));
        let scanner = Arc::new(RecordingScanner::new(&app_config.scanner, clock.clone())?);

        Ok(Self {
            app_config,
            clock,
            call_log,
            scanner,
        })
    }

    fn matcher(&self) -> RecordingMatcher {
        RecordingMatcher::new(self.call_log.clone(), self.app_config.matcher.clone())
    }

    fn state_store(&self) -> Result<Arc<SqliteStateStore>> {
        let path = self.app_config.state_db_path();
        let store = SqliteStateStore::new(&path)
            .with_context(|| format!("Failed to open state database {:?}", path))?;
        Ok(Arc::new(store))
    }
}

fn execute(args: CliArgs) -> Result<()> {
    let components = Components::build(&args)?;

    match args.command {
        Command::Scan { all, since_ms } => {
            let recordings = match (all, since_ms) {
                (true, _) => components.scanner.scan_all(),
                (false, Some(since)) => components.scanner.scan(since),
                (false, None) => components.scanner.scan_today(),
            };
            print_json(&recordings)
        }
        Command::Match => {
            let recordings = components.scanner.scan_today();
            print_json(&components.matcher().match_recordings(recordings))
        }
        Command::HasRecording { phone_number } => {
            let locator = RecordingLocator::new(components.scanner.clone());
            print_json(&locator.has_recording(&phone_number))
        }
        Command::Latest { phone_number } => {
            let locator = RecordingLocator::new(components.scanner.clone());
            print_json(&locator.find_latest_recording(&phone_number))
        }
        Command::CallTimes { phone_number } => {
            print_json(&components.call_log.last_call_times(&phone_number))
        }
        Command::LastDuration => print_json(&components.call_log.last_outgoing_call_duration()),
        Command::Uploads { command } => {
            let store = components.state_store()?;
            match command {
                UploadsCommand::List { limit } => print_json(&store.list_uploads(limit)?),
                UploadsCommand::Forget { file_path } => print_json(&store.forget(&file_path)?),
                UploadsCommand::Clear => print_json(&store.clear()?),
            }
        }
        Command::Token { command } => {
            let store = components.state_store()?;
            match command {
                TokenCommand::Set { token } => {
                    store.set_auth_token(&token)?;
                    println!("Token stored");
                    Ok(())
                }
                TokenCommand::Clear => {
                    store.clear_auth_token()?;
                    println!("Token cleared");
                    Ok(())
                }
                TokenCommand::Show => {
                    let token = store.auth_token()?;
                    print_json(&TokenStatus {
                        present: token.is_some(),
                        masked: token.as_deref().map(mask_token),
                    })
                }
            }
        }
        Command::UploadOnce => {
            let store = components.state_store()?;
            // Drives the HTTP client while this thread blocks on the cycle
            let runtime = tokio::runtime::Runtime::new()?;
            let uploader = HttpRecordingUploader::new(
                &components.app_config.upload,
                store.clone(),
                runtime.handle().clone(),
            )?;
            let tracker = UploadTracker::new(
                components.scanner.clone(),
                Arc::new(components.matcher()),
                Arc::new(uploader),
                store,
                components.clock.clone(),
            );
            print_json(&tracker.run_cycle(&CancellationToken::new()))
        }
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    execute(args)
}
