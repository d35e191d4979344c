//! Joins recordings with the call log.

use super::models::{MatchedCall, RecordingFile};
use crate::call_log::{CallLogEntry, CallLogReader};
use crate::config::MatcherSettings;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MATCH_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_MATCH_TOLERANCE_MS: i64 = 5 * 60 * 1000;

/// True when either number contains the other, which absorbs country-code
/// and prefix variants of the same line.
pub fn numbers_overlap(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

pub struct RecordingMatcher {
    call_log: Arc<CallLogReader>,
    settings: MatcherSettings,
}

impl RecordingMatcher {
    pub fn new(call_log: Arc<CallLogReader>, settings: MatcherSettings) -> Self {
        Self { call_log, settings }
    }

    /// Matches against the call log of the configured window.
    pub fn match_recordings(&self, recordings: Vec<RecordingFile>) -> Vec<MatchedCall> {
        let calls = self.call_log.recent_calls(self.settings.window_days);
        match_against_calls(recordings, &calls, self.settings.tolerance_ms)
    }
}

/// Greedy, independent per recording: each recording takes the nearest-in-time
/// call whose number overlaps, and one call may serve several recordings.
///
/// `calls` is expected newest first; on equal distance the earlier entry wins.
/// Without a qualifying call the recording keeps its own number with
/// `call_duration = 0`; recordings without a number are dropped.
pub fn match_against_calls(
    recordings: Vec<RecordingFile>,
    calls: &[CallLogEntry],
    tolerance_ms: i64,
) -> Vec<MatchedCall> {
    let mut matched = Vec::with_capacity(recordings.len());

    for recording in recordings {
        let Some(phone_number) = recording.phone_number.clone() else {
            debug!("Dropping {}: no phone number", recording.file_name);
            continue;
        };

        let best = calls
            .iter()
            .filter(|call| {
                (call.timestamp - recording.last_modified).abs() <= tolerance_ms
                    && numbers_overlap(&phone_number, &call.phone_number)
            })
            .min_by_key(|call| (call.timestamp - recording.last_modified).abs());

        let matched_call = match best {
            Some(call) => MatchedCall {
                phone_number: call.phone_number.clone(),
                call_timestamp: call.timestamp,
                call_duration: call.duration,
                recording,
            },
            None => MatchedCall {
                phone_number,
                call_timestamp: recording.last_modified,
                call_duration: 0,
                recording,
            },
        };
        matched.push(matched_call);
    }

    debug!("Matched {} recordings", matched.len());
    matched
}
