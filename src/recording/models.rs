use serde::Serialize;

/// A call recording found on storage. Snapshot taken at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFile {
    pub file_name: String,
    /// Absolute path, unique per recording.
    pub file_path: String,
    /// Bytes.
    pub file_size: u64,
    /// Epoch milliseconds.
    pub last_modified: i64,
    /// Number extracted from the file name.
    pub phone_number: Option<String>,
    /// Seconds, when known.
    pub duration: Option<u64>,
}

/// A recording joined with the call it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedCall {
    pub recording: RecordingFile,
    pub phone_number: String,
    /// Epoch milliseconds.
    pub call_timestamp: i64,
    /// Seconds, 0 when unknown.
    pub call_duration: u64,
}
