//! Retention cleanup of events, snapshots, stats and the job audit log.

use super::run_audited;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::BackgroundJobsSettings;
use std::time::Duration;

pub struct CleanupJob {
    interval_days: u64,
}

impl CleanupJob {
    pub fn from_settings(settings: &BackgroundJobsSettings) -> Self {
        Self {
            interval_days: settings.cleanup_interval_days,
        }
    }
}

impl BackgroundJob for CleanupJob {
    fn id(&self) -> &'static str {
        "cleanup"
    }

    fn name(&self) -> &'static str {
        "Retention Cleanup"
    }

    fn description(&self) -> &'static str {
        "Deletes listen events, snapshots and stats past their retention"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(self.interval_days * 24 * 60 * 60))
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.interval_days * 24 * 60 * 60)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        run_audited(ctx, self.id(), |ctx, now| ctx.pipeline.run_cleanup(now))
    }
}
