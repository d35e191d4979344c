//! Call recordings on local storage: discovery, phone-number extraction and
//! matching with the call log.

mod locator;
mod matcher;
mod models;
mod phone;
mod scanner;

pub use locator::RecordingLocator;
pub use matcher::{
    match_against_calls, numbers_overlap, RecordingMatcher, DEFAULT_MATCH_TOLERANCE_MS,
    DEFAULT_MATCH_WINDOW_DAYS,
};
pub use models::{MatchedCall, RecordingFile};
pub use phone::{PhoneNumberExtractor, DEFAULT_PHONE_PATTERNS};
pub use scanner::{RecordingScanner, DEFAULT_RECORDING_EXTENSIONS, DEFAULT_RECORDING_ROOTS};
