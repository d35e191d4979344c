use super::state::CallStateEvent;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiver of call-state events, handed to the monitor at construction.
pub trait CallEventSink: Send + Sync {
    fn send(&self, event: &CallStateEvent);
}

impl CallEventSink for mpsc::UnboundedSender<CallStateEvent> {
    fn send(&self, event: &CallStateEvent) {
        if mpsc::UnboundedSender::send(self, event.clone()).is_err() {
            debug!("Call state event dropped, receiver is gone");
        }
    }
}

/// Writes one JSON object per line and flushes after each event.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap()
    }
}

impl<W: Write + Send> CallEventSink for JsonLinesSink<W> {
    fn send(&self, event: &CallStateEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize call state event: {}", e);
                return;
            }
        };
        let mut writer = self.writer.lock().unwrap();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to write call state event: {}", e);
        }
    }
}
