//! Rebuilds the global and per-country charts.

use super::run_audited;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::BackgroundJobsSettings;
use std::time::Duration;

pub struct ChartUpdateJob {
    interval: Duration,
    /// Offset of the first run, so it lands after a fresh aggregation.
    offset: Duration,
}

impl ChartUpdateJob {
    pub fn from_settings(settings: &BackgroundJobsSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.chart_update_interval_mins * 60),
            offset: Duration::from_secs(settings.chart_update_offset_mins * 60),
        }
    }
}

impl BackgroundJob for ChartUpdateJob {
    fn id(&self) -> &'static str {
        "chart_update"
    }

    fn name(&self) -> &'static str {
        "Chart Update"
    }

    fn description(&self) -> &'static str {
        "Builds the global chart and the charts of every active country"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn initial_delay(&self) -> Duration {
        self.offset
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        run_audited(ctx, self.id(), |ctx, now| {
            ctx.pipeline.run_chart_update(now, &ctx.cancellation_token)
        })
    }
}
