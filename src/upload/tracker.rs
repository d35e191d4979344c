use super::client::{RecordingUploader, UploadOutcome};
use crate::clock::Clock;
use crate::metrics;
use crate::recording::{MatchedCall, RecordingMatcher, RecordingScanner};
use crate::state_store::UploadRecordStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Totals of one scan, match and upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCycleReport {
    pub scanned: usize,
    pub matched: usize,
    pub uploaded: usize,
    /// Already uploaded by an earlier cycle.
    pub skipped: usize,
    pub no_credential: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Runs upload cycles: scan today's recordings, match them with the call log
/// and upload every match that is not recorded as uploaded yet.
///
/// Failures stay per item and never abort the cycle. A recording that failed
/// is simply picked up again by the next cycle.
pub struct UploadTracker {
    scanner: Arc<RecordingScanner>,
    matcher: Arc<RecordingMatcher>,
    uploader: Arc<dyn RecordingUploader>,
    uploads: Arc<dyn UploadRecordStore>,
    clock: Arc<dyn Clock>,
}

impl UploadTracker {
    pub fn new(
        scanner: Arc<RecordingScanner>,
        matcher: Arc<RecordingMatcher>,
        uploader: Arc<dyn RecordingUploader>,
        uploads: Arc<dyn UploadRecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scanner,
            matcher,
            uploader,
            uploads,
            clock,
        }
    }

    pub fn run_cycle(&self, cancel: &CancellationToken) -> UploadCycleReport {
        let started = Instant::now();

        let recordings = self.scanner.scan_today();
        let scanned = recordings.len();
        let matched = self.matcher.match_recordings(recordings);

        let mut report = self.upload_matched(&matched, cancel);
        report.scanned = scanned;
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Upload cycle done in {}ms: {} scanned, {} matched, {} uploaded, {} skipped, {} without credential, {} failed",
            report.duration_ms,
            report.scanned,
            report.matched,
            report.uploaded,
            report.skipped,
            report.no_credential,
            report.failed
        );
        metrics::record_upload_cycle(&report);
        report
    }

    /// Uploads every match not yet recorded as uploaded.
    ///
    /// `cancel` is only looked at between items, an upload in flight always
    /// runs to completion or timeout.
    pub fn upload_matched(
        &self,
        matched: &[MatchedCall],
        cancel: &CancellationToken,
    ) -> UploadCycleReport {
        let mut report = UploadCycleReport {
            matched: matched.len(),
            ..Default::default()
        };

        for call in matched {
            if cancel.is_cancelled() {
                info!("Upload cycle cancelled, leaving remaining recordings for later");
                break;
            }

            let file_path = &call.recording.file_path;
            match self.uploads.is_uploaded(file_path) {
                Ok(true) => {
                    debug!("Already uploaded: {}", file_path);
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Cannot check upload record for {}: {}", file_path, e);
                    report.failed += 1;
                    continue;
                }
            }

            match self.uploader.upload(call) {
                Ok(UploadOutcome::Uploaded) => {
                    report.uploaded += 1;
                    if let Err(e) = self.uploads.mark_uploaded(file_path, self.clock.now_ms()) {
                        error!("Uploaded {} but failed to record it: {}", file_path, e);
                    } else {
                        info!("Uploaded {}", call.recording.file_name);
                    }
                }
                Ok(UploadOutcome::SkippedNoCredential) => {
                    report.no_credential += 1;
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", call.recording.file_name, e);
                    metrics::record_upload_failure(e.reason());
                    report.failed += 1;
                }
            }
        }

        report
    }
}
