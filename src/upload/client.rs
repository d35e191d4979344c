//! Delivery of a single recording to the upload API.

use super::error::{TransferPhase, UploadError};
use crate::config::UploadSettings;
use crate::recording::MatchedCall;
use crate::state_store::CredentialStore;
use anyhow::Result;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::Deserialize;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::runtime::Handle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

pub const DEFAULT_UPLOAD_URL: &str = "https://api.autocallup.com/api/recordings/upload";

/// 50 MiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

const UPLOAD_MIME: &str = "audio/*";
const READ_CHUNK_SIZE: usize = 4096 * 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// No credential stored yet. The recording stays unmarked.
    SkippedNoCredential,
}

/// Sends one matched recording. Implementations block until the server
/// answered or the transfer stalled.
pub trait RecordingUploader: Send + Sync {
    fn upload(&self, call: &MatchedCall) -> Result<UploadOutcome, UploadError>;
}

#[derive(Deserialize)]
struct UploadResponse {
    success: Option<bool>,
    message: Option<String>,
}

/// Time of the last byte moved on one upload.
struct TransferActivity {
    started: Instant,
    last_activity_ms: AtomicU64,
    body_sent: AtomicBool,
}

impl TransferActivity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            body_sent: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    fn mark_body_sent(&self) {
        self.touch();
        self.body_sent.store(true, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Resolves once the current phase went without progress for longer
    /// than its timeout. Never resolves while bytes keep moving.
    async fn stalled(&self, write_timeout: Duration, read_timeout: Duration) -> TransferPhase {
        loop {
            let (phase, limit) = if self.body_sent.load(Ordering::Relaxed) {
                (TransferPhase::Read, read_timeout)
            } else {
                (TransferPhase::Write, write_timeout)
            };
            let idle = self.idle();
            if idle >= limit {
                return phase;
            }
            tokio::time::sleep(limit - idle).await;
        }
    }
}

/// Reports every read of the recording file to a [`TransferActivity`].
///
/// The HTTP client pulls the next chunk only once the previous one was
/// written, so reads track the progress of the request body.
struct ActivityReader<R> {
    inner: R,
    activity: Arc<TransferActivity>,
}

impl<R: AsyncRead + Unpin> AsyncRead for ActivityReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let filled = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if buf.filled().len() == filled {
                self.activity.mark_body_sent();
            } else {
                self.activity.touch();
            }
        }
        poll
    }
}

/// Multipart uploader over the async HTTP client.
///
/// Connect, write and read timeouts are idle timeouts: an upload fails only
/// when one phase stops making progress, never because it is slow overall.
/// `upload` blocks the calling thread on `runtime`, which must be a
/// multi-threaded runtime; call it from `spawn_blocking` or from a thread
/// outside the runtime.
pub struct HttpRecordingUploader {
    client: Client,
    runtime: Handle,
    url: String,
    max_file_size: u64,
    write_timeout: Duration,
    read_timeout: Duration,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpRecordingUploader {
    pub fn new(
        settings: &UploadSettings,
        credentials: Arc<dyn CredentialStore>,
        runtime: Handle,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("callup-agent/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            runtime,
            url: settings.url.clone(),
            max_file_size: settings.max_file_size,
            write_timeout: settings.write_timeout(),
            read_timeout: settings.read_timeout(),
            credentials,
        })
    }

    fn check_file(&self, path: &Path) -> Result<u64, UploadError> {
        let file_path = path.to_string_lossy().to_string();
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(UploadError::FileMissing(file_path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::FileMissing(file_path))
            }
            Err(source) => {
                return Err(UploadError::Io {
                    path: file_path,
                    source,
                })
            }
        };

        let size = metadata.len();
        if size > self.max_file_size {
            return Err(UploadError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(size)
    }

    async fn build_form(
        &self,
        call: &MatchedCall,
        size: u64,
        activity: Arc<TransferActivity>,
    ) -> Result<Form, UploadError> {
        let path = &call.recording.file_path;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
        let reader = ActivityReader {
            inner: file,
            activity,
        };
        let body = Body::wrap_stream(ReaderStream::with_capacity(reader, READ_CHUNK_SIZE));
        let file_part = Part::stream_with_length(body, size)
            .file_name(call.recording.file_name.clone())
            .mime_str(UPLOAD_MIME)
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        Ok(Form::new()
            .part("file", file_part)
            .text("phoneNumber", call.phone_number.clone())
            .text("recordedAt", format_recorded_at(call.call_timestamp))
            .text("duration", call.call_duration.to_string()))
    }

    async fn send(&self, call: &MatchedCall, token: String, size: u64) -> Result<(), UploadError> {
        let activity = Arc::new(TransferActivity::new());
        let form = self.build_form(call, size, activity.clone()).await?;
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .multipart(form)
            .send();

        let response = tokio::select! {
            result = request => result.map_err(|e| UploadError::Transport(e.to_string()))?,
            phase = activity.stalled(self.write_timeout, self.read_timeout) => {
                return Err(UploadError::Timeout { phase });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::from_status(status.as_u16()));
        }

        let body = read_body(response, self.read_timeout).await?;
        parse_upload_response(&body)
    }
}

impl RecordingUploader for HttpRecordingUploader {
    fn upload(&self, call: &MatchedCall) -> Result<UploadOutcome, UploadError> {
        let size = self.check_file(Path::new(&call.recording.file_path))?;

        let token = match self
            .credentials
            .auth_token()
            .map_err(|e| UploadError::CredentialUnavailable(e.to_string()))?
        {
            Some(token) => token,
            None => {
                debug!(
                    "No auth credential, not uploading {}",
                    call.recording.file_name
                );
                return Ok(UploadOutcome::SkippedNoCredential);
            }
        };

        info!(
            "Uploading {} ({:#}) for {}",
            call.recording.file_name,
            byte_unit::Byte::from(size),
            call.phone_number
        );

        self.runtime.block_on(self.send(call, token, size))?;
        Ok(UploadOutcome::Uploaded)
    }
}

/// Reads the whole response body, failing when no chunk arrives within
/// `read_timeout`.
async fn read_body(mut response: Response, read_timeout: Duration) -> Result<String, UploadError> {
    let mut body = Vec::new();
    loop {
        match tokio::time::timeout(read_timeout, response.chunk()).await {
            Ok(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(UploadError::Transport(e.to_string())),
            Err(_) => {
                return Err(UploadError::Timeout {
                    phase: TransferPhase::Read,
                })
            }
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// `yyyy-MM-dd'T'HH:mm:ss'Z'` in UTC.
pub fn format_recorded_at(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// A 2xx body must be JSON carrying `success: true`.
fn parse_upload_response(body: &str) -> Result<(), UploadError> {
    let response: UploadResponse = serde_json::from_str(body)
        .map_err(|e| UploadError::MalformedResponse(e.to_string()))?;
    if response.success == Some(true) {
        Ok(())
    } else {
        Err(UploadError::Rejected {
            message: response
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingFile;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::runtime::Runtime;

    struct StaticCredentials(Mutex<Option<String>>);

    impl CredentialStore for StaticCredentials {
        fn auth_token(&self) -> anyhow::Result<Option<String>> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn set_auth_token(&self, token: &str) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = Some(token.to_string());
            Ok(())
        }
        fn clear_auth_token(&self) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    fn uploader(
        runtime: &Runtime,
        max_file_size: u64,
        token: Option<&str>,
    ) -> HttpRecordingUploader {
        let settings = UploadSettings {
            url: "http://127.0.0.1:9/upload".to_string(),
            max_file_size,
            ..Default::default()
        };
        let credentials = Arc::new(StaticCredentials(Mutex::new(token.map(String::from))));
        HttpRecordingUploader::new(&settings, credentials, runtime.handle().clone()).unwrap()
    }

    fn matched_call(path: &Path) -> MatchedCall {
        MatchedCall {
            recording: RecordingFile {
                file_name: path.file_name().unwrap().to_string_lossy().to_string(),
                file_path: path.to_string_lossy().to_string(),
                file_size: 0,
                last_modified: 0,
                phone_number: Some("01012345678".to_string()),
                duration: None,
            },
            phone_number: "01012345678".to_string(),
            call_timestamp: 1_737_700_000_000,
            call_duration: 185,
        }
    }

    fn write_file(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn missing_file_fails_before_anything_else() {
        let runtime = Runtime::new().unwrap();
        let dir = TempDir::new().unwrap();
        let call = matched_call(&dir.path().join("gone.mp3"));
        let result = uploader(&runtime, 1024, Some("token")).upload(&call);
        assert!(matches!(result, Err(UploadError::FileMissing(_))));
    }

    #[test]
    fn size_limit_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let exact = write_file(&dir, "exact.mp3", 64);
        let over = write_file(&dir, "over.mp3", 65);
        // Without a credential nothing hits the network.
        let runtime = Runtime::new().unwrap();
        let uploader = uploader(&runtime, 64, None);

        assert_eq!(
            uploader.upload(&matched_call(&exact)).unwrap(),
            UploadOutcome::SkippedNoCredential
        );
        assert!(matches!(
            uploader.upload(&matched_call(&over)),
            Err(UploadError::FileTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn missing_credential_skips() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "01012345678.m4a", 8);
        let runtime = Runtime::new().unwrap();
        let outcome = uploader(&runtime, 1024, None)
            .upload(&matched_call(&path))
            .unwrap();
        assert_eq!(outcome, UploadOutcome::SkippedNoCredential);
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "01012345678.m4a", 8);
        let runtime = Runtime::new().unwrap();
        let result = uploader(&runtime, 1024, Some("token")).upload(&matched_call(&path));
        assert!(matches!(result, Err(UploadError::Transport(_))));
    }

    #[test]
    fn formats_recorded_at_in_utc() {
        assert_eq!(format_recorded_at(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_recorded_at(1_737_700_000_123), "2025-01-24T06:26:40Z");
    }

    #[test]
    fn response_requires_success_flag() {
        assert!(parse_upload_response(r#"{"success":true}"#).is_ok());

        let rejected = parse_upload_response(r#"{"success":false,"message":"duplicate"}"#);
        assert!(
            matches!(rejected, Err(UploadError::Rejected { message }) if message == "duplicate")
        );

        let absent = parse_upload_response(r#"{"message":"hm"}"#);
        assert!(matches!(absent, Err(UploadError::Rejected { message }) if message == "hm"));

        let unknown = parse_upload_response("{}");
        assert!(
            matches!(unknown, Err(UploadError::Rejected { message }) if message == "Unknown error")
        );

        assert!(matches!(
            parse_upload_response("<html>ok</html>"),
            Err(UploadError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn stall_watch_follows_transfer_phase() {
        let activity = TransferActivity::new();
        let phase = activity
            .stalled(Duration::from_millis(50), Duration::from_secs(30))
            .await;
        assert_eq!(phase, TransferPhase::Write);

        activity.mark_body_sent();
        let started = Instant::now();
        let phase = activity
            .stalled(Duration::from_secs(30), Duration::from_millis(50))
            .await;
        assert_eq!(phase, TransferPhase::Read);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn steady_progress_never_stalls() {
        let activity = Arc::new(TransferActivity::new());
        let writer = activity.clone();
        let progress = tokio::spawn(async move {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                writer.touch();
            }
        });

        let started = Instant::now();
        let phase = activity
            .stalled(Duration::from_millis(100), Duration::from_millis(100))
            .await;
        assert_eq!(phase, TransferPhase::Write);
        // 10 touches 30ms apart, then 100ms of silence
        assert!(started.elapsed() >= Duration::from_millis(350));
        progress.await.unwrap();
    }
}
