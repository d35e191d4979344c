//! Background job scheduling and execution system.
//!
//! Jobs run on an interval, in response to hook events such as a call going
//! back to idle, or both.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use jobs::RecordingUploadJob;
pub use scheduler::{create_scheduler, JobScheduler};
