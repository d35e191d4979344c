//! Mock upload API
//!
//! Accepts multipart uploads, remembers what it received and answers with a
//! configurable status and body. [`SlowUploadServer`] speaks raw HTTP to
//! control the pace of the answer.

use super::constants::{SLOW_BODY, SUCCESS_BODY, UPLOAD_PATH};
use axum::extract::{Multipart, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as seen by the mock server
#[derive(Debug, Clone, Default)]
pub struct ReceivedUpload {
    pub authorization: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_bytes: Vec<u8>,
    /// Text parts by name
    pub fields: HashMap<String, String>,
}

#[derive(Clone)]
struct MockState {
    received: Arc<Mutex<Vec<ReceivedUpload>>>,
    response: Arc<Mutex<(StatusCode, String)>>,
}

async fn handle_upload(
    State(state): State<MockState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, String) {
    let mut upload = ReceivedUpload {
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        ..Default::default()
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            upload.file_name = field.file_name().map(String::from);
            upload.content_type = field.content_type().map(String::from);
            upload.file_bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        } else {
            let value = field.text().await.unwrap_or_default();
            upload.fields.insert(name, value);
        }
    }

    state.received.lock().unwrap().push(upload);
    state.response.lock().unwrap().clone()
}

/// Mock upload server on a random local port
///
/// When dropped, the server shuts down.
pub struct MockUploadServer {
    /// Full upload endpoint URL
    pub url: String,

    state: MockState,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockUploadServer {
    /// Spawns the server, answering 200 with a success body until told otherwise
    pub async fn spawn() -> Self {
        let state = MockState {
            received: Arc::new(Mutex::new(Vec::new())),
            response: Arc::new(Mutex::new((StatusCode::OK, SUCCESS_BODY.to_string()))),
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let app = Router::new()
            .route(UPLOAD_PATH, post(handle_upload))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock server failed");
        });

        Self {
            url: format!("http://127.0.0.1:{}{}", port, UPLOAD_PATH),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Changes the answer for every following request
    pub fn respond_with(&self, status: StatusCode, body: &str) {
        *self.state.response.lock().unwrap() = (status, body.to_string());
    }

    pub fn received(&self) -> Vec<ReceivedUpload> {
        self.state.received.lock().unwrap().clone()
    }

    /// Polls until `count` uploads arrived or `timeout` elapsed
    pub async fn wait_for_uploads(&self, count: usize, timeout: Duration) -> Vec<ReceivedUpload> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Drop for MockUploadServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Raw HTTP server that reads each upload in full, then answers 200 with
/// [`SLOW_BODY`] one byte per `byte_interval`. With no interval it keeps the
/// connection open and never answers.
#[allow(dead_code)]
pub struct SlowUploadServer {
    pub url: String,
    accept_task: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl SlowUploadServer {
    pub async fn spawn(byte_interval: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer_slowly(stream, byte_interval));
            }
        });

        Self {
            url: format!("http://127.0.0.1:{}{}", port, UPLOAD_PATH),
            accept_task,
        }
    }
}

impl Drop for SlowUploadServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn answer_slowly(mut stream: TcpStream, byte_interval: Option<Duration>) {
    let _ = stream.set_nodelay(true);
    if read_request(&mut stream).await.is_err() {
        return;
    }

    let Some(interval) = byte_interval else {
        tokio::time::sleep(Duration::from_secs(60)).await;
        return;
    };

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        SLOW_BODY.len()
    );
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for byte in SLOW_BODY.bytes() {
        tokio::time::sleep(interval).await;
        if stream.write_all(&[byte]).await.is_err() {
            return;
        }
    }
    let _ = stream.shutdown().await;
}

/// Reads until the request body is complete, by Content-Length or the end
/// of a chunked body.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        request.extend_from_slice(&chunk[..n]);
        if request_complete(&request) {
            return Ok(());
        }
    }
}

fn request_complete(request: &[u8]) -> bool {
    let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok());
    match content_length {
        Some(length) => request.len() >= head_end + 4 + length,
        None => request.ends_with(b"0\r\n\r\n"),
    }
}
