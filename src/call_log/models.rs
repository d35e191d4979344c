use serde::Serialize;

/// Call type as stored by the OS call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Voicemail,
    Rejected,
    Blocked,
    Other(i64),
}

impl CallType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => CallType::Incoming,
            2 => CallType::Outgoing,
            3 => CallType::Missed,
            4 => CallType::Voicemail,
            5 => CallType::Rejected,
            6 => CallType::Blocked,
            other => CallType::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            CallType::Incoming => 1,
            CallType::Outgoing => 2,
            CallType::Missed => 3,
            CallType::Voicemail => 4,
            CallType::Rejected => 5,
            CallType::Blocked => 6,
            CallType::Other(code) => *code,
        }
    }
}

/// One row of the OS call history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogEntry {
    pub phone_number: String,
    /// Call start, epoch milliseconds.
    pub timestamp: i64,
    /// Seconds.
    pub duration: u64,
    pub call_type: CallType,
}

/// Filter for [`super::CallLogProvider::query`]. Every field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct CallLogQuery {
    pub since_ms: Option<i64>,
    pub call_type: Option<CallType>,
    /// Exact number match.
    pub number: Option<String>,
    pub limit: Option<usize>,
}

/// Start and end of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTimes {
    pub start_time: i64,
    pub end_time: i64,
    pub duration: u64,
}

impl From<&CallLogEntry> for CallTimes {
    fn from(entry: &CallLogEntry) -> Self {
        Self {
            start_time: entry.timestamp,
            end_time: entry.timestamp + entry.duration as i64 * 1000,
            duration: entry.duration,
        }
    }
}
