//! Recording upload: the HTTP operation and the recurring upload cycle.

mod client;
mod error;
mod tracker;

pub use client::{
    format_recorded_at, HttpRecordingUploader, RecordingUploader, UploadOutcome,
    DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_UPLOAD_URL,
};
pub use error::{TransferPhase, UploadError};
pub use tracker::{UploadCycleReport, UploadTracker};
