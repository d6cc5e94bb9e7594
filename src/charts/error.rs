use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline stage '{0}' is already running")]
    StageBusy(&'static str),

    #[error("pipeline run was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Argument errors surfaced synchronously to chart readers.
#[derive(Debug, Error)]
pub enum ChartQueryError {
    #[error("limit must be between 1 and {max}, got {got}")]
    InvalidLimit { max: usize, got: usize },

    #[error("invalid chart scope: {0}")]
    InvalidScope(String),

    #[error("invalid chart type: {0}")]
    InvalidChartType(String),

    #[error("days must be between 1 and {max}, got {got}")]
    InvalidDays { max: u32, got: u32 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("invalid country code: {0}")]
    InvalidCountry(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
