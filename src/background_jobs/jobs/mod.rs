//! Specific background job implementations.

pub mod recording_upload;

pub use recording_upload::RecordingUploadJob;
