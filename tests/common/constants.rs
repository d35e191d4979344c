//! Shared values for the end-to-end tests

#![allow(dead_code)]

pub const TEST_TOKEN: &str = "test-bearer-token";

/// Number with an entry in the test call log.
pub const LOGGED_NUMBER: &str = "01012345678";

/// Number that only appears in recording file names.
pub const UNLOGGED_NUMBER: &str = "0212345678";

pub const UPLOAD_PATH: &str = "/api/recordings/upload";

pub const SUCCESS_BODY: &str = r#"{"success":true,"message":"ok"}"#;

/// Success answer sent byte by byte by the slow server.
pub const SLOW_BODY: &str = r#"{"success":true}"#;

/// Android call log type code for outgoing calls.
pub const OUTGOING: i64 = 2;

pub const RECORDING_BYTES: &[u8] = b"ID3\x03\x00\x00\x00\x00\x00\x00not really audio";
