use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Telephony call state as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Ringing,
    Offhook,
}

impl CallState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CallState::Idle),
            1 => Some(CallState::Ringing),
            2 => Some(CallState::Offhook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "IDLE",
            CallState::Ringing => "RINGING",
            CallState::Offhook => "OFFHOOK",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallState {
    type Err = String;

    /// Accepts the numeric OS codes and the state names in any case, with or
    /// without a `CALL_STATE_` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return CallState::from_code(code)
                .ok_or_else(|| format!("Unknown call state code: {}", code));
        }
        let upper = s.to_ascii_uppercase();
        match upper.strip_prefix("CALL_STATE_").unwrap_or(&upper) {
            "IDLE" => Ok(CallState::Idle),
            "RINGING" => Ok(CallState::Ringing),
            "OFFHOOK" => Ok(CallState::Offhook),
            _ => Err(format!("Unknown call state: {}", s)),
        }
    }
}

/// Event delivered to the layer above for every emitted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum CallStateEvent {
    Idle {
        /// Seconds; `None` when neither the off-hook time nor the call log
        /// could tell.
        #[serde(rename = "callDuration")]
        call_duration: Option<u64>,
    },
    Ringing {
        number: Option<String>,
    },
    Offhook {
        number: Option<String>,
    },
}

impl CallStateEvent {
    pub fn state(&self) -> CallState {
        match self {
            CallStateEvent::Idle { .. } => CallState::Idle,
            CallStateEvent::Ringing { .. } => CallState::Ringing,
            CallStateEvent::Offhook { .. } => CallState::Offhook,
        }
    }
}
