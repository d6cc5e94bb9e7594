use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use crate::server_store::{JobRunStatus, JobScheduleState, ServerStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps without re-checking schedules.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// How long cancellable jobs get to wind down at shutdown.
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Task handles of running jobs, managed by the scheduler loop
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    server_store: Arc<dyn ServerStore>,

    /// Hook events from the HTTP server and the orchestrator.
    hook_receiver: mpsc::Receiver<HookEvent>,

    /// Commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    shutdown_token: CancellationToken,

    /// Shared context; each run gets a copy with its own token.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            server_store,
            hook_receiver,
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    ///
    /// Interval jobs without a persisted schedule get their first run at
    /// `now + initial_delay`.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());

        if job.schedule().interval().is_some() {
            match self.server_store.get_schedule_state(&job_id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let state = JobScheduleState {
                        job_id: job_id.clone(),
                        next_run_at: Utc::now() + to_chrono(job.initial_delay()),
                        last_run_at: None,
                    };
                    if let Err(e) = self.server_store.update_schedule_state(&state) {
                        warn!("Failed to initialize schedule state for {}: {}", job_id, e);
                    }
                }
                Err(e) => warn!("Failed to read schedule state for {}: {}", job_id, e),
            }
        }

        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        // Runs still flagged as running were interrupted by a restart
        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob {
                job_id,
                wait_for_completion,
                response,
            } => {
                if let Err(e) = self.check_can_trigger(&job_id).await {
                    let _ = response.send(Err(e));
                    return;
                }
                if wait_for_completion {
                    self.spawn_job(&job_id, "manual", Some(response)).await;
                } else {
                    self.spawn_job(&job_id, "manual", None).await;
                    let _ = response.send(Ok(()));
                }
            }
        }
    }

    async fn check_can_trigger(&self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        Ok(())
    }

    /// Persisted next run of an interval job, `None` for hook-only jobs.
    fn get_next_run_time(&self, job_id: &str, job: &Arc<dyn BackgroundJob>) -> Option<DateTime<Utc>> {
        job.schedule().interval()?;
        match self.server_store.get_schedule_state(job_id) {
            Ok(Some(state)) => Some(state.next_run_at),
            Ok(None) => Some(Utc::now()),
            Err(e) => {
                warn!("Failed to read schedule state for {}: {}", job_id, e);
                None
            }
        }
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = MAX_SLEEP;
        let now = Utc::now();

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) {
                continue;
            }
            if let Some(next_run) = self.get_next_run_time(job_id, job) {
                if next_run <= now {
                    return Duration::ZERO;
                }
                let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                min_duration = min_duration.min(duration);
            }
        }
        min_duration
    }

    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();
        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    continue;
                }
                if matches!(self.get_next_run_time(job_id, job), Some(next_run) if next_run <= now)
                {
                    jobs_to_run.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule", None).await;
        }
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();
        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if !job.schedule().listens_to(event) {
                    continue;
                }
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }
                jobs_to_trigger.push(job_id.clone());
            }
        }

        let trigger = format!("hook:{}", event);
        for job_id in jobs_to_trigger {
            self.spawn_job(&job_id, &trigger, None).await;
        }
    }

    /// Spawn a job execution task. `completion` receives the run's result.
    async fn spawn_job(
        &mut self,
        job_id: &str,
        triggered_by: &str,
        completion: Option<oneshot::Sender<Result<(), JobError>>>,
    ) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    if let Some(completion) = completion {
                        let _ = completion.send(Err(JobError::NotFound));
                    }
                    return;
                }
            }
        };

        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                if let Some(completion) = completion {
                    let _ = completion.send(Err(JobError::ExecutionFailed(e.to_string())));
                }
                return;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }

        // Only scheduled runs move the schedule, so hook and manual runs keep
        // the configured offsets between jobs
        if triggered_by == "schedule" {
            if let Some(interval) = job.schedule().interval() {
                self.advance_schedule(job_id, interval);
            }
        }

        metrics::set_background_job_running(job_id, true);

        // Not derived from the shutdown token: stopping the scheduler only
        // cancels the runs of cancellable jobs
        let cancel_token = CancellationToken::new();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let server_store = Arc::clone(&self.server_store);
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    Err(JobError::ExecutionFailed(format!("Task panic: {}", e)))
                }
            };
            let (status, error_msg, status_label) = match &result {
                Ok(()) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Err(JobError::Cancelled) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Failed,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Err(e) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            if let Err(e) = server_store.record_job_finish(run_id, status, error_msg) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            {
                let mut state = shared_state.write().await;
                state.running_jobs.remove(&job_id_owned);
            }

            if let Some(completion) = completion {
                let _ = completion.send(result);
            }
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    fn advance_schedule(&self, job_id: &str, interval: Duration) {
        let last_run_at = match self.server_store.get_schedule_state(job_id) {
            Ok(state) => state.and_then(|s| s.last_run_at),
            Err(_) => None,
        };
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: Utc::now() + to_chrono(interval),
            last_run_at,
        };
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            warn!("Failed to advance schedule of {}: {}", job_id, e);
        }
    }

    /// Stamps the completion time of a finished interval job.
    fn record_last_run(&self, job_id: &str) {
        match self.server_store.get_schedule_state(job_id) {
            Ok(Some(mut state)) => {
                state.last_run_at = Some(Utc::now());
                if let Err(e) = self.server_store.update_schedule_state(&state) {
                    error!("Failed to update schedule state for {}: {}", job_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to read schedule state for {}: {}", job_id, e),
        }
    }

    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
            self.record_last_run(&job_id);
        }
    }

    /// Cancels cancellable jobs and waits for every running job to finish.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let behaviors: HashMap<String, ShutdownBehavior> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .map(|(id, job)| (id.clone(), job.shutdown_behavior()))
                .collect()
        };

        for (job_id, handle) in self.running_handles.drain() {
            let behavior = behaviors
                .get(&job_id)
                .copied()
                .unwrap_or(ShutdownBehavior::Cancellable);
            match behavior {
                ShutdownBehavior::WaitForCompletion => {
                    info!("Waiting for job {} to complete...", job_id);
                    let _ = handle.await;
                }
                ShutdownBehavior::Cancellable => {
                    if let Some(token) = self.job_cancel_tokens.get(&job_id) {
                        debug!("Cancelling job: {}", job_id);
                        token.cancel();
                    }
                    if tokio::time::timeout(CANCEL_GRACE, handle).await.is_err() {
                        warn!("Job {} did not stop within {:?}", job_id, CANCEL_GRACE);
                    }
                }
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_default()
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let (hook_tx, hook_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));

    let scheduler = JobScheduler::new(
        server_store.clone(),
        hook_rx,
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );
    let handle = SchedulerHandle::new(command_tx, hook_tx, shared_state, server_store);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::test_support::TestEnv;
    use crate::background_jobs::job::JobSchedule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        initial_delay: Duration,
        execution_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    impl TestJob {
        fn new(id: &'static str, schedule: JobSchedule) -> Self {
            Self {
                id,
                schedule,
                initial_delay: Duration::ZERO,
                execution_count: Arc::new(AtomicUsize::new(0)),
                should_fail: false,
            }
        }
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn initial_delay(&self) -> Duration {
            self.initial_delay
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn create_test_scheduler(env: &TestEnv) -> (JobScheduler, SchedulerHandle) {
        create_scheduler(
            env.server_store.clone(),
            env.shutdown_token.clone(),
            env.job_context(),
        )
    }

    fn hook_job(id: &'static str, event: HookEvent) -> TestJob {
        TestJob::new(id, JobSchedule::Hook(event))
    }

    #[tokio::test]
    async fn test_register_and_list_jobs_sorted() {
        let env = TestEnv::new();
        let (mut scheduler, handle) = create_test_scheduler(&env);

        for id in ["job_c", "job_a", "job_b"] {
            scheduler
                .register_job(Arc::new(hook_job(id, HookEvent::OnStartup)))
                .await;
        }

        assert_eq!(scheduler.job_count().await, 3);
        let jobs = handle.list_jobs().await.unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["job_a", "job_b", "job_c"]);
        assert!(!jobs[0].is_running);
        assert!(jobs[0].last_run.is_none());
        assert!(handle.job_exists("job_a").await);
        assert!(!handle.job_exists("nonexistent").await);
        assert!(handle.get_job("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_initializes_schedule_with_initial_delay() {
        let env = TestEnv::new();
        let (mut scheduler, _handle) = create_test_scheduler(&env);

        let mut job = TestJob::new("offset_job", JobSchedule::Interval(Duration::from_secs(900)));
        job.initial_delay = Duration::from_secs(300);
        let before = Utc::now();
        scheduler.register_job(Arc::new(job)).await;

        let state = env
            .server_store
            .get_schedule_state("offset_job")
            .unwrap()
            .unwrap();
        let delay = (state.next_run_at - before).num_seconds();
        assert!((299..=301).contains(&delay), "delay was {}", delay);
    }

    #[tokio::test]
    async fn test_job_execution_on_startup_hook() {
        let env = TestEnv::new();
        let (mut scheduler, handle) = create_test_scheduler(&env);

        let job = hook_job("startup_job", HookEvent::OnStartup);
        let exec_count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(exec_count.load(Ordering::SeqCst), 1);
        let history = handle.get_job_history("startup_job", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].triggered_by, "hook:OnStartup");

        env.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let env = TestEnv::new();
        let (mut scheduler, handle) = create_test_scheduler(&env);

        let mut job = hook_job("failing_job", HookEvent::OnStartup);
        job.should_fail = true;
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let history = handle.get_job_history("failing_job", 10).unwrap();
        assert_eq!(history[0].status, "failed");
        assert!(history[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("Test failure"));

        env.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_hook_triggered_job_execution() {
        let env = TestEnv::new();
        let (mut scheduler, handle) = create_test_scheduler(&env);

        let job = hook_job("catalog_change_job", HookEvent::OnCatalogChange);
        let exec_count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Not an OnStartup job
        assert_eq!(exec_count.load(Ordering::SeqCst), 0);

        handle.fire_hook(HookEvent::OnCatalogChange).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(exec_count.load(Ordering::SeqCst), 1);
        let history = handle.get_job_history("catalog_change_job", 10).unwrap();
        assert_eq!(history[0].triggered_by, "hook:OnCatalogChange");

        env.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_due_interval_job_runs_and_advances_schedule() {
        let env = TestEnv::new();
        let (mut scheduler, handle) = create_test_scheduler(&env);

        let job = TestJob::new("interval_job", JobSchedule::Interval(Duration::from_secs(3600)));
        let exec_count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(exec_count.load(Ordering::SeqCst), 1);
        let history = handle.get_job_history("interval_job", 10).unwrap();
        assert_eq!(history[0].triggered_by, "schedule");

        let state = env
            .server_store
            .get_schedule_state("interval_job")
            .unwrap()
            .unwrap();
        assert!(state.next_run_at > Utc::now() + chrono::Duration::seconds(3500));

        env.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_run_job_waits_for_result() {
        let env = TestEnv::new();
        let (mut scheduler, handle) = create_test_scheduler(&env);

        let ok_job = hook_job("ok_job", HookEvent::OnCatalogChange);
        let ok_count = ok_job.execution_count.clone();
        let mut bad_job = hook_job("bad_job", HookEvent::OnCatalogChange);
        bad_job.should_fail = true;
        scheduler.register_job(Arc::new(ok_job)).await;
        scheduler.register_job(Arc::new(bad_job)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        handle.run_job("ok_job").await.unwrap();
        assert_eq!(ok_count.load(Ordering::SeqCst), 1);
        assert!(matches!(
            handle.run_job("bad_job").await,
            Err(JobError::ExecutionFailed(_))
        ));
        assert!(matches!(
            handle.trigger_job("nonexistent").await,
            Err(JobError::NotFound)
        ));

        let history = handle.get_job_history("ok_job", 10).unwrap();
        assert_eq!(history[0].triggered_by, "manual");

        env.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }
}
