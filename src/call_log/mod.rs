//! Read-only access to the OS call history.

mod models;
mod provider;
mod reader;

pub use models::{CallLogEntry, CallLogQuery, CallTimes, CallType};
pub use provider::{CallLogError, CallLogProvider, NullCallLogProvider, SqliteCallLogProvider};
pub use reader::CallLogReader;
