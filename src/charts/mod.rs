//! The chart engine: listen intake, daily aggregation, scoring, chart
//! building and the read side serving published charts.

mod aggregator;
mod builder;
mod countries;
pub mod dates;
mod decay;
mod error;
mod listens;
mod pipeline;
mod query;
mod scoring;

pub use aggregator::{AggregationReport, DailyAggregator};
pub use builder::{derive_trend, BuildReport, ChartBuilder, TREND_DEAD_ZONE};
pub use countries::{active_countries, select_active_countries, ActivityThresholds};
pub use decay::{DecaySchedule, DecayScheduleError, DecayStep};
pub use error::{ChartQueryError, ListenError, PipelineError};
pub use listens::{is_valid_listen, record_listen, MIN_VALID_LISTEN_SECS};
pub use pipeline::{
    ChartPipeline, ChartUpdateReport, CleanupReport, DailyRecalcReport, HealthReport,
    PipelineStage, StageReport,
};
pub use query::{
    parse_chart_scope, parse_scope, ChartPage, ChartQueryService, ChartStats, MAX_CHART_LIMIT,
    MAX_HISTORY_DAYS, MAX_TRENDING_LIMIT,
};
pub use scoring::{score_stats, ScoreCalculator, ScoredCandidate};
