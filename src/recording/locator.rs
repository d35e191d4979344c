use super::matcher::numbers_overlap;
use super::models::RecordingFile;
use super::scanner::RecordingScanner;
use std::sync::Arc;

/// Looks up recordings of a given number across every scanned root.
pub struct RecordingLocator {
    scanner: Arc<RecordingScanner>,
}

impl RecordingLocator {
    pub fn new(scanner: Arc<RecordingScanner>) -> Self {
        Self { scanner }
    }

    pub fn has_recording(&self, phone_number: &str) -> bool {
        self.find_latest_recording(phone_number).is_some()
    }

    /// Newest recording whose file-name number overlaps `phone_number`.
    pub fn find_latest_recording(&self, phone_number: &str) -> Option<RecordingFile> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return None;
        }
        self.scanner
            .scan_all()
            .into_iter()
            .filter(|r| {
                r.phone_number
                    .as_deref()
                    .map_or(false, |n| numbers_overlap(n, phone_number))
            })
            .max_by_key(|r| r.last_modified)
    }
}
