//! Telephony adapters: where call-state callbacks come from.

use super::state::CallState;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Callback target for call-state changes.
pub trait CallStateListener: Send + Sync {
    fn on_call_state_changed(&self, state: CallState, number: Option<String>);
}

/// Source of call-state callbacks.
///
/// At most one listener is registered at a time. `unregister` must be safe to
/// call when nothing is registered.
pub trait TelephonyService: Send + Sync {
    fn register(&self, listener: Arc<dyn CallStateListener>) -> Result<()>;
    fn unregister(&self);
}

type SharedListener = Arc<Mutex<Option<Arc<dyn CallStateListener>>>>;

enum LineSource {
    /// Opened again on every registration (regular file or FIFO).
    Path(PathBuf),
    /// Consumed by the first registration.
    Reader(Mutex<Option<Box<dyn BufRead + Send>>>),
}

/// Reads call-state lines such as `OFFHOOK 01012345678`, `RINGING`, `0` or
/// `2 0101234` on a background thread and forwards them to the registered
/// listener.
///
/// The reader thread ends at end of input, or at the first line after
/// `unregister`.
pub struct LineTelephonyService {
    source: LineSource,
    listener: SharedListener,
}

impl LineTelephonyService {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: LineSource::Path(path.into()),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            source: LineSource::Reader(Mutex::new(Some(Box::new(reader)))),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        match &self.source {
            LineSource::Path(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open call state input {:?}", path))?;
                Ok(Box::new(BufReader::new(file)))
            }
            LineSource::Reader(reader) => match reader.lock().unwrap().take() {
                Some(reader) => Ok(reader),
                None => bail!("Call state input was already consumed"),
            },
        }
    }
}

impl TelephonyService for LineTelephonyService {
    fn register(&self, listener: Arc<dyn CallStateListener>) -> Result<()> {
        let reader = self.open()?;
        *self.listener.lock().unwrap() = Some(listener);

        let shared = Arc::clone(&self.listener);
        std::thread::Builder::new()
            .name("call-state-reader".to_string())
            .spawn(move || read_lines(reader, shared))
            .context("Failed to spawn call state reader thread")?;
        Ok(())
    }

    fn unregister(&self) {
        self.listener.lock().unwrap().take();
    }
}

fn read_lines(reader: Box<dyn BufRead + Send>, listener: SharedListener) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read call state input: {}", e);
                break;
            }
        };

        let Some(current) = listener.lock().unwrap().clone() else {
            debug!("Call state listener unregistered, stopping reader");
            return;
        };

        if let Some((state, number)) = parse_line(&line) {
            current.on_call_state_changed(state, number);
        }
    }
    info!("Call state input ended");
}

/// Parses `<state> [number]`. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Option<(CallState, Option<String>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut parts = line.split_whitespace();
    let state_token = parts.next()?;
    let state = match state_token.parse::<CallState>() {
        Ok(state) => state,
        Err(e) => {
            warn!("Ignoring call state line {:?}: {}", line, e);
            return None;
        }
    };
    let number = parts.next().map(str::to_string);
    Some((state, number))
}
