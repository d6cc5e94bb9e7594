//! Background job scheduling for the chart pipeline.
//!
//! Jobs run on intervals, on hook events or on manual triggers. Runs are
//! recorded in the server store so history and schedules survive restarts.

mod audit_logger;
pub mod context;
pub mod handle;
pub mod job;
pub mod jobs;
pub mod orchestrator;
pub mod scheduler;

pub use audit_logger::JobAuditLogger;
pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use orchestrator::{job_id_for, ChartOrchestrator, OrchestratorState, OrchestratorStatus};
pub use scheduler::{create_scheduler, JobScheduler};
