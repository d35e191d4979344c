//! Callup Agent Library
//!
//! Call recording discovery, call log matching, recording upload and
//! call-state monitoring. Exposed as a library for both binaries and the
//! integration tests.

pub mod background_jobs;
pub mod call_log;
pub mod call_state;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod recording;
pub mod sqlite_persistence;
pub mod state_store;
pub mod upload;

// Re-export commonly used types for convenience
pub use call_log::{CallLogReader, SqliteCallLogProvider};
pub use recording::{RecordingMatcher, RecordingScanner};
pub use state_store::SqliteStateStore;
pub use upload::{HttpRecordingUploader, UploadTracker};
