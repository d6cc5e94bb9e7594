//! Lifecycle owner of the chart jobs.
//!
//! Wraps the [`JobScheduler`] with the five pipeline jobs registered, and
//! exposes start/stop/status/trigger to the server and to tests.

use super::context::JobContext;
use super::handle::{JobInfo, SchedulerHandle};
use super::job::{HookEvent, JobError};
use super::jobs::{AggregationJob, ChartUpdateJob, CleanupJob, DailyRecalcJob, HealthCheckJob};
use super::scheduler::{create_scheduler, JobScheduler};
use crate::charts::ChartPipeline;
use crate::config::BackgroundJobsSettings;
use crate::server_store::ServerStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    Created,
    Running,
    Stopped,
}

enum Lifecycle {
    Created(Box<JobScheduler>),
    Running(JoinHandle<()>),
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> OrchestratorState {
        match self {
            Lifecycle::Created(_) => OrchestratorState::Created,
            Lifecycle::Running(_) => OrchestratorState::Running,
            Lifecycle::Stopped => OrchestratorState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub jobs: Vec<JobInfo>,
}

/// Maps the camelCase stage names used by operators onto job ids.
pub fn job_id_for(name: &str) -> &str {
    match name {
        "chartUpdate" => "chart_update",
        "dailyRecalc" => "daily_recalc",
        "healthCheck" => "health_check",
        other => other,
    }
}

pub struct ChartOrchestrator {
    lifecycle: Mutex<Lifecycle>,
    handle: SchedulerHandle,
    shutdown_token: CancellationToken,
}

impl ChartOrchestrator {
    /// Builds the scheduler and registers the pipeline jobs. Nothing runs until `start`.
    pub async fn new(
        pipeline: Arc<ChartPipeline>,
        server_store: Arc<dyn ServerStore>,
        settings: &BackgroundJobsSettings,
    ) -> Self {
        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(
            CancellationToken::new(),
            pipeline,
            Arc::clone(&server_store),
        );
        let (mut scheduler, handle) =
            create_scheduler(server_store, shutdown_token.clone(), job_context);

        scheduler
            .register_job(Arc::new(AggregationJob::from_settings(settings)))
            .await;
        scheduler
            .register_job(Arc::new(ChartUpdateJob::from_settings(settings)))
            .await;
        scheduler
            .register_job(Arc::new(DailyRecalcJob::from_settings(settings)))
            .await;
        scheduler
            .register_job(Arc::new(CleanupJob::from_settings(settings)))
            .await;
        scheduler
            .register_job(Arc::new(HealthCheckJob::from_settings(settings)))
            .await;

        Self {
            lifecycle: Mutex::new(Lifecycle::Created(Box::new(scheduler))),
            handle,
            shutdown_token,
        }
    }

    /// Starts the scheduler loop. Calling it again, or after `stop`, does nothing.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Created(_)) {
            return;
        }
        if let Lifecycle::Created(mut scheduler) =
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        {
            info!("Starting chart orchestrator");
            let task = tokio::spawn(async move { scheduler.run().await });
            *lifecycle = Lifecycle::Running(task);
        }
    }

    /// Stops future firings and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        self.shutdown_token.cancel();
        if let Lifecycle::Running(task) = previous {
            info!("Stopping chart orchestrator");
            let _ = task.await;
            info!("Chart orchestrator stopped");
        }
    }

    pub async fn state(&self) -> OrchestratorState {
        self.lifecycle.lock().await.state()
    }

    pub async fn status(&self) -> anyhow::Result<OrchestratorStatus> {
        Ok(OrchestratorStatus {
            state: self.state().await,
            jobs: self.handle.list_jobs().await?,
        })
    }

    /// Runs a job out of band and waits for its result.
    pub async fn trigger_job(&self, name: &str) -> Result<(), JobError> {
        if self.state().await != OrchestratorState::Running {
            return Err(JobError::ExecutionFailed(
                "Scheduler is not running".to_string(),
            ));
        }
        self.handle.run_job(job_id_for(name)).await
    }

    pub async fn notify_hook(&self, event: HookEvent) -> anyhow::Result<()> {
        self.handle.fire_hook(event).await
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::test_support::TestEnv;
    use crate::chart_store::{ChartStore, ChartType, DailyTrackStat, TrackDisplay, GLOBAL_SCOPE};
    use crate::charts::dates::today;
    use std::time::Duration;

    async fn orchestrator(env: &TestEnv) -> ChartOrchestrator {
        ChartOrchestrator::new(
            env.pipeline.clone(),
            env.server_store.clone(),
            &BackgroundJobsSettings::default(),
        )
        .await
    }

    #[test]
    fn test_job_id_for_camel_case_names() {
        assert_eq!(job_id_for("chartUpdate"), "chart_update");
        assert_eq!(job_id_for("dailyRecalc"), "daily_recalc");
        assert_eq!(job_id_for("healthCheck"), "health_check");
        assert_eq!(job_id_for("cleanup"), "cleanup");
    }

    #[tokio::test]
    async fn test_lifecycle_and_status() {
        let env = TestEnv::new();
        let orchestrator = orchestrator(&env).await;

        let status = orchestrator.status().await.unwrap();
        assert_eq!(status.state, OrchestratorState::Created);
        let ids: Vec<&str> = status.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["aggregation", "chart_update", "cleanup", "daily_recalc", "health_check"]
        );

        orchestrator.start().await;
        orchestrator.start().await;
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);

        orchestrator.stop().await;
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);

        // Stopped is final
        orchestrator.start().await;
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.trigger_job("cleanup").await.is_err());
    }

    #[tokio::test]
    async fn test_startup_runs_aggregation_and_chart_update() {
        let env = TestEnv::new();
        let orchestrator = orchestrator(&env).await;

        orchestrator.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let handle = orchestrator.handle();
        for job_id in ["aggregation", "chart_update"] {
            let history = handle.get_job_history(job_id, 10).unwrap();
            assert_eq!(history.len(), 1, "{} should have run once", job_id);
            assert_eq!(history[0].triggered_by, "hook:OnStartup");
        }
        assert!(handle.get_job_history("cleanup", 10).unwrap().is_empty());

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_runs_complete() {
        let env = TestEnv::new();
        env.catalog.add_simple("a");
        env.chart_store
            .merge_daily_stats(
                &[DailyTrackStat {
                    track_id: "a".to_string(),
                    country: GLOBAL_SCOPE.to_string(),
                    date: today(),
                    listen_count: 3,
                    valid_listen_count: 3,
                    total_listen_secs: 600,
                    unique_listeners: 3,
                    display: TrackDisplay::default(),
                }],
                &[],
            )
            .unwrap();
        let orchestrator = Arc::new(orchestrator(&env).await);

        // Startup runs block on the gate, so they are still in flight at stop
        let gate = env.pipeline.hold_stats_gate();
        orchestrator.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopping = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!stopping.is_finished());

        drop(gate);
        stopping.await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);

        let handle = orchestrator.handle();
        for job_id in ["aggregation", "chart_update"] {
            let history = handle.get_job_history(job_id, 10).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].status, "completed", "{} did not complete", job_id);
        }
        let chart = env
            .chart_store
            .get_latest_chart(ChartType::Global, GLOBAL_SCOPE)
            .unwrap();
        assert_eq!(chart.len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_job_waits_for_completion() {
        let env = TestEnv::new();
        let orchestrator = orchestrator(&env).await;
        orchestrator.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        orchestrator.trigger_job("dailyRecalc").await.unwrap();
        let history = orchestrator
            .handle()
            .get_job_history("daily_recalc", 10)
            .unwrap();
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].triggered_by, "manual");

        assert!(matches!(
            orchestrator.trigger_job("nope").await,
            Err(JobError::NotFound)
        ));

        orchestrator.stop().await;
    }
}
