use super::models::{CallLogEntry, CallLogQuery, CallTimes, CallType};
use super::provider::{CallLogError, CallLogProvider};
use crate::clock::Clock;
use std::sync::Arc;
use tracing::{debug, warn};

const DAY_MS: i64 = 86_400_000;

/// Higher-level call history queries.
///
/// Provider failures never reach the caller: they are logged with their kind
/// and reported as "no data".
pub struct CallLogReader {
    provider: Arc<dyn CallLogProvider>,
    clock: Arc<dyn Clock>,
}

impl CallLogReader {
    pub fn new(provider: Arc<dyn CallLogProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { provider, clock }
    }

    /// Calls that started within the last `days` days, newest first.
    pub fn recent_calls(&self, days: u32) -> Vec<CallLogEntry> {
        let since_ms = self.clock.now_ms() - days as i64 * DAY_MS;
        let query = CallLogQuery {
            since_ms: Some(since_ms),
            ..Default::default()
        };
        match self.provider.query(&query) {
            Ok(entries) => {
                debug!("Read {} call log entries from the last {} days", entries.len(), days);
                entries
            }
            Err(err) => {
                log_query_error("recent calls", &err);
                Vec::new()
            }
        }
    }

    /// Duration in seconds of the newest outgoing call.
    pub fn last_outgoing_call_duration(&self) -> Option<u64> {
        self.newest(CallLogQuery {
            call_type: Some(CallType::Outgoing),
            limit: Some(1),
            ..Default::default()
        })
        .map(|entry| entry.duration)
    }

    /// Start and end of the newest outgoing call to exactly `phone_number`.
    pub fn last_call_times(&self, phone_number: &str) -> Option<CallTimes> {
        let times = self
            .newest(CallLogQuery {
                call_type: Some(CallType::Outgoing),
                number: Some(phone_number.to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .map(|entry| CallTimes::from(&entry));
        if times.is_none() {
            debug!("No outgoing call found for {}", phone_number);
        }
        times
    }

    fn newest(&self, query: CallLogQuery) -> Option<CallLogEntry> {
        match self.provider.query(&query) {
            Ok(entries) => entries.into_iter().next(),
            Err(err) => {
                log_query_error("newest call", &err);
                None
            }
        }
    }
}

fn log_query_error(what: &str, err: &CallLogError) {
    match err {
        CallLogError::PermissionDenied(msg) => {
            warn!("Cannot read {}: call log permission denied ({})", what, msg)
        }
        CallLogError::Unavailable(msg) => {
            warn!("Cannot read {}: call log unavailable ({})", what, msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;

    struct MockProvider {
        entries: Vec<CallLogEntry>,
        fail_with: Option<fn(String) -> CallLogError>,
        last_query: Mutex<Option<CallLogQuery>>,
    }

    impl MockProvider {
        fn with_entries(entries: Vec<CallLogEntry>) -> Self {
            Self {
                entries,
                fail_with: None,
                last_query: Mutex::new(None),
            }
        }

        fn failing(fail_with: fn(String) -> CallLogError) -> Self {
            Self {
                entries: Vec::new(),
                fail_with: Some(fail_with),
                last_query: Mutex::new(None),
            }
        }
    }

    impl CallLogProvider for MockProvider {
        fn query(&self, query: &CallLogQuery) -> Result<Vec<CallLogEntry>, CallLogError> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            if let Some(fail_with) = self.fail_with {
                return Err(fail_with("mock".to_string()));
            }
            let mut entries: Vec<CallLogEntry> = self
                .entries
                .iter()
                .filter(|e| query.since_ms.map_or(true, |since| e.timestamp >= since))
                .filter(|e| query.call_type.map_or(true, |t| e.call_type == t))
                .filter(|e| query.number.as_ref().map_or(true, |n| &e.phone_number == n))
                .cloned()
                .collect();
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            if let Some(limit) = query.limit {
                entries.truncate(limit);
            }
            Ok(entries)
        }
    }

    fn entry(number: &str, timestamp: i64, duration: u64, call_type: CallType) -> CallLogEntry {
        CallLogEntry {
            phone_number: number.to_string(),
            timestamp,
            duration,
            call_type,
        }
    }

    fn make_reader(provider: MockProvider, now_ms: i64) -> (CallLogReader, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let reader = CallLogReader::new(provider.clone(), Arc::new(ManualClock::new(now_ms)));
        (reader, provider)
    }

    #[test]
    fn recent_calls_uses_trailing_window() {
        let now = 10 * DAY_MS;
        let (reader, provider) = make_reader(
            MockProvider::with_entries(vec![
                entry("010", now - 8 * DAY_MS, 10, CallType::Outgoing),
                entry("011", now - DAY_MS, 20, CallType::Incoming),
            ]),
            now,
        );

        let calls = reader.recent_calls(7);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].phone_number, "011");
        let query = provider.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.since_ms, Some(now - 7 * DAY_MS));
    }

    #[test]
    fn errors_degrade_to_empty() {
        let (reader, _) = make_reader(MockProvider::failing(CallLogError::PermissionDenied), 0);
        assert!(reader.recent_calls(7).is_empty());
        assert_eq!(reader.last_outgoing_call_duration(), None);

        let (reader, _) = make_reader(MockProvider::failing(CallLogError::Unavailable), 0);
        assert!(reader.recent_calls(7).is_empty());
        assert_eq!(reader.last_call_times("01012345678"), None);
    }

    #[test]
    fn last_outgoing_call_duration_ignores_incoming() {
        let (reader, _) = make_reader(
            MockProvider::with_entries(vec![
                entry("01011112222", 1_000, 33, CallType::Outgoing),
                entry("01033334444", 2_000, 99, CallType::Incoming),
            ]),
            10_000,
        );
        assert_eq!(reader.last_outgoing_call_duration(), Some(33));
    }

    #[test]
    fn last_call_times_computes_end() {
        let (reader, _) = make_reader(
            MockProvider::with_entries(vec![
                entry("01011112222", 1_000, 10, CallType::Outgoing),
                entry("01011112222", 5_000, 42, CallType::Outgoing),
                entry("01011112222", 9_000, 50, CallType::Incoming),
            ]),
            10_000,
        );

        let times = reader.last_call_times("01011112222").unwrap();
        assert_eq!(
            times,
            CallTimes {
                start_time: 5_000,
                end_time: 47_000,
                duration: 42
            }
        );
        assert!(reader.last_call_times("0109999").is_none());
    }
}
