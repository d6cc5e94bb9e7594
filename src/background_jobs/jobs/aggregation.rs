//! Merges pending listen events into daily stats.

use super::run_audited;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::BackgroundJobsSettings;
use std::time::Duration;

pub struct AggregationJob {
    interval: Duration,
}

impl AggregationJob {
    pub fn from_settings(settings: &BackgroundJobsSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.aggregation_interval_mins * 60),
        }
    }
}

impl BackgroundJob for AggregationJob {
    fn id(&self) -> &'static str {
        "aggregation"
    }

    fn name(&self) -> &'static str {
        "Listen Aggregation"
    }

    fn description(&self) -> &'static str {
        "Aggregates pending listen events into per-day track statistics"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    // The startup hook covers the first run
    fn initial_delay(&self) -> Duration {
        self.interval
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        run_audited(ctx, self.id(), |ctx, now| ctx.pipeline.run_aggregation(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::test_support::TestEnv;
    use crate::chart_store::{state_keys, ChartStore};

    #[test]
    fn test_job_metadata() {
        let job = AggregationJob::from_settings(&BackgroundJobsSettings::default());

        assert_eq!(job.id(), "aggregation");
        assert_eq!(job.initial_delay(), Duration::from_secs(15 * 60));
        assert_eq!(job.schedule().interval(), Some(Duration::from_secs(15 * 60)));
        assert!(job.schedule().listens_to(HookEvent::OnStartup));
        assert_eq!(job.shutdown_behavior(), ShutdownBehavior::WaitForCompletion);
    }

    #[test]
    fn test_execute_sets_stats_watermark() {
        let env = TestEnv::new();
        let job = AggregationJob::from_settings(&BackgroundJobsSettings::default());

        job.execute(&env.job_context()).unwrap();

        assert!(env
            .chart_store
            .get_pipeline_state(state_keys::STATS_WATERMARK)
            .unwrap()
            .is_some());
    }
}
