//! Background job that uploads call recordings.
//!
//! Each run is one upload cycle: scan today's recordings, match them with the
//! call log and upload whatever is not uploaded yet. The next run is scheduled
//! one interval after the previous one finished.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::upload::UploadTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct RecordingUploadJob {
    tracker: Arc<UploadTracker>,
    interval: Duration,
    /// Also run a cycle each time a call ends.
    upload_after_call: bool,
}

impl RecordingUploadJob {
    pub fn new(tracker: Arc<UploadTracker>, interval: Duration, upload_after_call: bool) -> Self {
        Self {
            tracker,
            interval,
            upload_after_call,
        }
    }
}

impl BackgroundJob for RecordingUploadJob {
    fn id(&self) -> &'static str {
        "recording_upload"
    }

    fn name(&self) -> &'static str {
        "Recording Upload"
    }

    fn description(&self) -> &'static str {
        "Uploads today's call recordings that match a call log entry"
    }

    fn schedule(&self) -> JobSchedule {
        let mut hooks = vec![HookEvent::OnStartup];
        if self.upload_after_call {
            hooks.push(HookEvent::OnCallEnded);
        }
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks,
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // The tracker stops between items on its own
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let report = self.tracker.run_cycle(&ctx.cancellation_token);
        if ctx.is_cancelled() {
            info!(
                "Recording upload stopped early after {} uploads",
                report.uploaded
            );
        }
        Ok(())
    }
}
