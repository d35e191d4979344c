//! Local persistence: upload records, the auth credential and job history.

mod models;
mod schema;
mod sqlite_state_store;

pub use models::*;
pub use schema::STATE_VERSIONED_SCHEMAS;
pub use sqlite_state_store::SqliteStateStore;

use anyhow::Result;

/// Key of the auth credential in the key-value state.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// The "already uploaded" set.
///
/// A path present in the store is never uploaded again. Records are only ever
/// added; removal happens through explicit operator action (`forget`, `clear`).
pub trait UploadRecordStore: Send + Sync {
    fn is_uploaded(&self, file_path: &str) -> Result<bool>;
    /// Records `file_path` as uploaded at `uploaded_at` (epoch ms).
    /// An existing record is left untouched.
    fn mark_uploaded(&self, file_path: &str, uploaded_at: i64) -> Result<()>;
    fn uploaded_at(&self, file_path: &str) -> Result<Option<i64>>;
    /// Most recent uploads first.
    fn list_uploads(&self, limit: usize) -> Result<Vec<UploadRecord>>;
    fn upload_count(&self) -> Result<usize>;
    /// Returns true if a record was removed.
    fn forget(&self, file_path: &str) -> Result<bool>;
    /// Returns the number of removed records.
    fn clear(&self) -> Result<usize>;
}

/// Source of the bearer credential used by the uploader.
pub trait CredentialStore: Send + Sync {
    /// Blank values are reported as absent.
    fn auth_token(&self) -> Result<Option<String>>;
    fn set_auth_token(&self, token: &str) -> Result<()>;
    fn clear_auth_token(&self) -> Result<()>;
}

pub trait JobStore: Send + Sync {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;
}
