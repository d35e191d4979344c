mod file_config;

pub use file_config::{CallStateConfig, FileConfig, MatcherConfig, ScannerConfig, UploadConfig};

use crate::recording::{
    DEFAULT_MATCH_TOLERANCE_MS, DEFAULT_MATCH_WINDOW_DAYS, DEFAULT_PHONE_PATTERNS,
    DEFAULT_RECORDING_EXTENSIONS, DEFAULT_RECORDING_ROOTS,
};
use crate::upload::{DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_UPLOAD_URL};
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub call_log_db: Option<PathBuf>,
    pub recording_roots: Vec<PathBuf>,
    pub upload_url: Option<String>,
    pub upload_interval_secs: Option<u64>,
    pub call_state: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub metrics_port: u16,
    /// Android-schema call log database. Without it the call log reads as empty.
    pub call_log_db: Option<PathBuf>,

    // Feature configs (with defaults)
    pub scanner: ScannerSettings,
    pub matcher: MatcherSettings,
    pub upload: UploadSettings,
    pub call_state: CallStateSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let call_log_db = file
            .call_log_db
            .map(PathBuf::from)
            .or_else(|| cli.call_log_db.clone());

        let scanner_file = file.scanner.unwrap_or_default();
        let roots = match scanner_file.roots {
            Some(roots) => roots.into_iter().map(PathBuf::from).collect(),
            None if !cli.recording_roots.is_empty() => cli.recording_roots.clone(),
            None => ScannerSettings::default().roots,
        };
        let extensions = scanner_file
            .extensions
            .map(|exts| {
                exts.into_iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| ScannerSettings::default().extensions);
        if extensions.is_empty() {
            bail!("scanner.extensions must not be empty");
        }
        let phone_patterns = scanner_file
            .phone_patterns
            .unwrap_or_else(|| ScannerSettings::default().phone_patterns);
        for pattern in &phone_patterns {
            Regex::new(pattern)
                .with_context(|| format!("Invalid phone pattern in config: {}", pattern))?;
        }
        let scanner = ScannerSettings {
            roots,
            extensions,
            phone_patterns,
            today_window_hours: scanner_file.today_window_hours.unwrap_or(24),
        };

        let matcher_file = file.matcher.unwrap_or_default();
        let matcher = MatcherSettings {
            window_days: matcher_file
                .window_days
                .unwrap_or(DEFAULT_MATCH_WINDOW_DAYS),
            tolerance_ms: matcher_file
                .tolerance_secs
                .map(|s| s as i64 * 1000)
                .unwrap_or(DEFAULT_MATCH_TOLERANCE_MS),
        };

        let upload_file = file.upload.unwrap_or_default();
        let upload_defaults = UploadSettings::default();
        let url = upload_file
            .url
            .or_else(|| cli.upload_url.clone())
            .unwrap_or(upload_defaults.url);
        if reqwest::Url::parse(&url).is_err() {
            bail!("Invalid upload url: {}", url);
        }
        let interval_secs = upload_file
            .interval_secs
            .or(cli.upload_interval_secs)
            .unwrap_or(upload_defaults.interval_secs);
        if interval_secs == 0 {
            bail!("upload.interval_secs must be greater than zero");
        }
        let upload = UploadSettings {
            url,
            interval_secs,
            max_file_size: upload_file
                .max_file_size_mb
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(upload_defaults.max_file_size),
            connect_timeout_secs: upload_file
                .connect_timeout_secs
                .unwrap_or(upload_defaults.connect_timeout_secs),
            write_timeout_secs: upload_file
                .write_timeout_secs
                .unwrap_or(upload_defaults.write_timeout_secs),
            read_timeout_secs: upload_file
                .read_timeout_secs
                .unwrap_or(upload_defaults.read_timeout_secs),
            upload_after_call: upload_file
                .upload_after_call
                .unwrap_or(upload_defaults.upload_after_call),
        };

        let call_state_file = file.call_state.unwrap_or_default();
        let call_state = CallStateSettings {
            enabled: call_state_file.enabled.unwrap_or(cli.call_state),
            input: call_state_file.input.map(PathBuf::from),
            events_output: call_state_file.events_output.map(PathBuf::from),
        };

        Ok(Self {
            db_dir,
            metrics_port,
            call_log_db,
            scanner,
            matcher,
            upload,
            call_state,
        })
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.db_dir.join("callup.db")
    }
}

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub roots: Vec<PathBuf>,
    /// Lowercase, without the leading dot.
    pub extensions: Vec<String>,
    pub phone_patterns: Vec<String>,
    pub today_window_hours: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            roots: DEFAULT_RECORDING_ROOTS.iter().map(PathBuf::from).collect(),
            extensions: DEFAULT_RECORDING_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            phone_patterns: DEFAULT_PHONE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            today_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatcherSettings {
    pub window_days: u32,
    pub tolerance_ms: i64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_MATCH_WINDOW_DAYS,
            tolerance_ms: DEFAULT_MATCH_TOLERANCE_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub url: String,
    pub interval_secs: u64,
    /// Largest accepted file, in bytes. A file of exactly this size is uploaded.
    pub max_file_size: u64,
    pub connect_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Also run an upload cycle whenever a call ends.
    pub upload_after_call: bool,
}

impl UploadSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Longest pause while sending the request body.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Longest wait for the response to start, and between response chunks.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPLOAD_URL.to_string(),
            interval_secs: 600,
            max_file_size: DEFAULT_MAX_UPLOAD_SIZE,
            connect_timeout_secs: 60,
            write_timeout_secs: 120,
            read_timeout_secs: 60,
            upload_after_call: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallStateSettings {
    pub enabled: bool,
    pub input: Option<PathBuf>,
    pub events_output: Option<PathBuf>,
}
