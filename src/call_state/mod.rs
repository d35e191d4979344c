//! Call-state monitoring: turns telephony callbacks into IDLE/RINGING/OFFHOOK
//! events with the duration of the call that just ended.

mod monitor;
mod sink;
mod state;
mod telephony;

pub use monitor::CallStateMonitor;
pub use sink::{CallEventSink, JsonLinesSink};
pub use state::{CallState, CallStateEvent};
pub use telephony::{parse_line, CallStateListener, LineTelephonyService, TelephonyService};
