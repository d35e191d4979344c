//! Common test infrastructure
//!
//! End-to-end tests drive the real HTTP uploader against an in-process mock
//! of the upload API. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{MockUploadServer, TEST_TOKEN};
//!
//! #[tokio::test]
//! async fn test_upload() {
//!     let server = MockUploadServer::spawn().await;
//!     // ... upload to server.url ...
//!     assert_eq!(server.received().len(), 1);
//! }
//! ```

mod constants;
mod fixtures;
mod server;

pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{
    create_call_log_db, create_state_store, matched_call, now_ms, upload_blocking, upload_settings,
    write_recording,
};
#[allow(unused_imports)]
pub use server::{MockUploadServer, ReceivedUpload, SlowUploadServer};
