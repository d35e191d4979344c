use std::fmt;
use thiserror::Error;

/// Which side of an upload stopped making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Sending the request body.
    Write,
    /// Waiting for or reading the response.
    Read,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPhase::Write => write!(f, "write"),
            TransferPhase::Read => write!(f, "read"),
        }
    }
}

/// Why a single recording could not be delivered.
///
/// Every variant is a per-item failure: the recording stays unmarked and is
/// retried by the next cycle.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Recording file not found: {0}")]
    FileMissing(String),

    #[error("Recording too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Cannot read recording {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read auth credential: {0}")]
    CredentialUnavailable(String),

    #[error("Auth credential expired (401)")]
    CredentialExpired,

    #[error("File rejected as too large by the server (413)")]
    PayloadTooLarge,

    #[error("Audio format rejected by the server (415)")]
    UnsupportedFormat,

    #[error("Server error (500)")]
    ServerError,

    #[error("Upload failed with status {code}")]
    Status { code: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upload stalled: no {phase} progress within the timeout")]
    Timeout { phase: TransferPhase },

    #[error("Upload rejected: {message}")]
    Rejected { message: String },

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),
}

impl UploadError {
    /// Maps a non-2xx status to its failure.
    pub fn from_status(code: u16) -> Self {
        match code {
            401 => UploadError::CredentialExpired,
            413 => UploadError::PayloadTooLarge,
            415 => UploadError::UnsupportedFormat,
            500 => UploadError::ServerError,
            code => UploadError::Status { code },
        }
    }

    /// Short label used in metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            UploadError::FileMissing(_) => "file_missing",
            UploadError::FileTooLarge { .. } => "file_too_large",
            UploadError::Io { .. } => "io",
            UploadError::CredentialUnavailable(_) => "credential_unavailable",
            UploadError::CredentialExpired => "credential_expired",
            UploadError::PayloadTooLarge => "payload_too_large",
            UploadError::UnsupportedFormat => "unsupported_format",
            UploadError::ServerError => "server_error",
            UploadError::Status { .. } => "status",
            UploadError::Transport(_) => "transport",
            UploadError::Timeout { .. } => "timeout",
            UploadError::Rejected { .. } => "rejected",
            UploadError::MalformedResponse(_) => "malformed_response",
        }
    }
}
