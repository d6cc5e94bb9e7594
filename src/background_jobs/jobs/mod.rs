//! The scheduled stages of the chart pipeline.
//!
//! Each job is a thin wrapper over one [`ChartPipeline`](crate::charts::ChartPipeline)
//! stage: it brackets the run with audit entries and maps the stage error
//! onto a [`JobError`].

pub mod aggregation;
pub mod chart_update;
pub mod cleanup;
pub mod daily_recalc;
pub mod health_check;

pub use aggregation::AggregationJob;
pub use chart_update::ChartUpdateJob;
pub use cleanup::CleanupJob;
pub use daily_recalc::DailyRecalcJob;
pub use health_check::HealthCheckJob;

use crate::background_jobs::{context::JobContext, job::JobError, JobAuditLogger};
use crate::charts::PipelineError;
use serde::Serialize;
use std::sync::Arc;

/// Runs `stage` with started/completed/failed audit entries around it.
pub(crate) fn run_audited<R, F>(ctx: &JobContext, job_id: &str, stage: F) -> Result<(), JobError>
where
    R: Serialize,
    F: FnOnce(&JobContext, i64) -> Result<R, PipelineError>,
{
    let audit = JobAuditLogger::new(Arc::clone(&ctx.server_store), job_id);
    let now = chrono::Utc::now().timestamp();
    audit.log_started(Some(serde_json::json!({ "now": now })));

    match stage(ctx, now) {
        Ok(report) => {
            audit.log_completed(serde_json::to_value(&report).ok());
            Ok(())
        }
        Err(e) => {
            let err = JobError::from(e);
            audit.log_failed(&err.to_string(), None);
            Err(err)
        }
    }
}
