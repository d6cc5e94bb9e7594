use crate::charts::ChartPipeline;
use crate::server_store::ServerStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// The chart pipeline stages the jobs drive.
    pub pipeline: Arc<ChartPipeline>,

    /// Access to server-side state (job history, schedules, audit log).
    pub server_store: Arc<dyn ServerStore>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        pipeline: Arc<ChartPipeline>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            cancellation_token,
            pipeline,
            server_store,
        }
    }

    /// Same context with another cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            pipeline: Arc::clone(&self.pipeline),
            server_store: Arc::clone(&self.server_store),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
