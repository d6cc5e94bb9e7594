//! Periodic health report of the pipeline.

use super::run_audited;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::BackgroundJobsSettings;
use std::time::Duration;

pub struct HealthCheckJob {
    interval: Duration,
}

impl HealthCheckJob {
    pub fn from_settings(settings: &BackgroundJobsSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.health_check_interval_mins * 60),
        }
    }
}

impl BackgroundJob for HealthCheckJob {
    fn id(&self) -> &'static str {
        "health_check"
    }

    fn name(&self) -> &'static str {
        "Chart Health Check"
    }

    fn description(&self) -> &'static str {
        "Reports listen backlog and chart freshness, raising an alert when either lags"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        run_audited(ctx, self.id(), |ctx, now| ctx.pipeline.run_health_check(now))
    }
}
