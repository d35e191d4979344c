use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,
    pub call_log_db: Option<String>,

    // Feature configs
    pub scanner: Option<ScannerConfig>,
    pub matcher: Option<MatcherConfig>,
    pub upload: Option<UploadConfig>,
    pub call_state: Option<CallStateConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Directories searched for call recordings, replaces the built-in list.
    pub roots: Option<Vec<String>>,
    pub extensions: Option<Vec<String>>,
    /// Regexes tried in order against the file name.
    pub phone_patterns: Option<Vec<String>>,
    pub today_window_hours: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MatcherConfig {
    pub window_days: Option<u32>,
    pub tolerance_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub url: Option<String>,
    pub interval_secs: Option<u64>,
    pub max_file_size_mb: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub upload_after_call: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CallStateConfig {
    pub enabled: Option<bool>,
    /// File or FIFO the call-state lines are read from. Stdin when unset.
    pub input: Option<String>,
    /// JSON-lines file the events are appended to. Stdout when unset.
    pub events_output: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
