//! Daily full recalculation of the charts.
//!
//! Prunes snapshots of tracks that left the catalog or lost eligibility,
//! rebuilds all charts and realigns catalog peaks with the retained history.
//! Also fired by catalog changes.

use super::run_audited;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::BackgroundJobsSettings;
use std::time::Duration;

pub struct DailyRecalcJob {
    interval: Duration,
}

impl DailyRecalcJob {
    pub fn from_settings(settings: &BackgroundJobsSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.daily_recalc_interval_hours * 60 * 60),
        }
    }
}

impl BackgroundJob for DailyRecalcJob {
    fn id(&self) -> &'static str {
        "daily_recalc"
    }

    fn name(&self) -> &'static str {
        "Daily Chart Recalculation"
    }

    fn description(&self) -> &'static str {
        "Prunes orphan snapshots, rebuilds every chart and realigns catalog peak positions"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnCatalogChange],
        }
    }

    fn initial_delay(&self) -> Duration {
        self.interval
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        run_audited(ctx, self.id(), |ctx, now| {
            ctx.pipeline.run_daily_recalc(now, &ctx.cancellation_token)
        })
    }
}
