//! Test fixtures: recording trees, call log databases and state stores

use callup_agent::config::UploadSettings;
use callup_agent::recording::{MatchedCall, RecordingFile};
use callup_agent::state_store::{CredentialStore, SqliteStateStore};
use callup_agent::upload::{HttpRecordingUploader, RecordingUploader, UploadError, UploadOutcome};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Writes a recording and sets its modification time
pub fn write_recording(dir: &Path, name: &str, bytes: &[u8], modified_ms: i64) -> PathBuf {
    fs::create_dir_all(dir).expect("Failed to create recording dir");
    let path = dir.join(name);
    fs::write(&path, bytes).expect("Failed to write recording");
    fs::File::options()
        .write(true)
        .open(&path)
        .expect("Failed to reopen recording")
        .set_modified(UNIX_EPOCH + Duration::from_millis(modified_ms as u64))
        .expect("Failed to set modification time");
    path
}

/// Creates an Android-schema call log with the given
/// `(number, date_ms, duration_secs, type)` rows
pub fn create_call_log_db(dir: &Path, rows: &[(&str, i64, i64, i64)]) -> PathBuf {
    let path = dir.join("calllog.db");
    let conn = Connection::open(&path).expect("Failed to create call log");
    conn.execute(
        "CREATE TABLE calls (_id INTEGER PRIMARY KEY, number TEXT, date INTEGER, duration INTEGER, type INTEGER)",
        [],
    )
    .expect("Failed to create calls table");
    for (number, date, duration, call_type) in rows {
        conn.execute(
            "INSERT INTO calls (number, date, duration, type) VALUES (?1, ?2, ?3, ?4)",
            params![number, date, duration, call_type],
        )
        .expect("Failed to insert call");
    }
    path
}

/// Opens a state store in `dir`, optionally with a stored bearer token
pub fn create_state_store(dir: &Path, token: Option<&str>) -> Arc<SqliteStateStore> {
    let store = SqliteStateStore::new(dir.join("callup.db")).expect("Failed to open state store");
    if let Some(token) = token {
        store.set_auth_token(token).expect("Failed to store token");
    }
    Arc::new(store)
}

pub fn upload_settings(url: &str) -> UploadSettings {
    UploadSettings {
        url: url.to_string(),
        connect_timeout_secs: 5,
        write_timeout_secs: 5,
        read_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn matched_call(
    path: &Path,
    phone_number: &str,
    call_timestamp: i64,
    call_duration: u64,
) -> MatchedCall {
    let metadata = fs::metadata(path).expect("Recording must exist");
    MatchedCall {
        recording: RecordingFile {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_path: path.to_string_lossy().to_string(),
            file_size: metadata.len(),
            last_modified: call_timestamp,
            phone_number: Some(phone_number.to_string()),
            duration: None,
        },
        phone_number: phone_number.to_string(),
        call_timestamp,
        call_duration,
    }
}

/// Runs one upload on a blocking thread, the way the upload job does.
/// Needs a multi-threaded test runtime.
pub async fn upload_blocking(
    settings: UploadSettings,
    store: Arc<SqliteStateStore>,
    call: MatchedCall,
) -> Result<UploadOutcome, UploadError> {
    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || {
        let uploader = HttpRecordingUploader::new(&settings, store, runtime)
            .expect("Failed to build uploader");
        uploader.upload(&call)
    })
    .await
    .expect("Upload task panicked")
}

#[allow(dead_code)]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
