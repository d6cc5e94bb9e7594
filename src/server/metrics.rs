use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all chart engine metrics
const PREFIX: &str = "charts";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "endpoint"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions by outcome"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job execution time in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "1 while a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Pipeline Metrics
    pub static ref LISTEN_EVENTS_PROCESSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_listen_events_processed_total"), "Listen events consumed by aggregation"),
        &["outcome"]
    ).expect("Failed to create listen_events_processed_total metric");

    pub static ref AGGREGATION_GROUPS_FAILED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_aggregation_groups_failed_total"),
        "Aggregation groups that failed to merge and were left for the next run"
    ).expect("Failed to create aggregation_groups_failed_total metric");

    pub static ref CHART_ENTRIES_WRITTEN_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_chart_entries_written_total"), "Chart snapshot rows published"),
        &["chart_type"]
    ).expect("Failed to create chart_entries_written_total metric");

    pub static ref CHART_CANDIDATES_DROPPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_chart_candidates_dropped_total"), "Scored candidates dropped because their track could not be resolved"),
        &["chart_type"]
    ).expect("Failed to create chart_candidates_dropped_total metric");

    pub static ref LISTEN_BACKLOG: Gauge = Gauge::new(
        format!("{PREFIX}_listen_backlog"),
        "Listen events waiting to be aggregated"
    ).expect("Failed to create listen_backlog metric");

    pub static ref ACTIVE_COUNTRIES: Gauge = Gauge::new(
        format!("{PREFIX}_active_countries"),
        "Countries with a chart published today"
    ).expect("Failed to create active_countries metric");

    pub static ref HEALTH_ALERT: Gauge = Gauge::new(
        format!("{PREFIX}_health_alert"),
        "1 when the last health check found the pipeline unhealthy"
    ).expect("Failed to create health_alert metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(LISTEN_EVENTS_PROCESSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(AGGREGATION_GROUPS_FAILED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CHART_ENTRIES_WRITTEN_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CHART_CANDIDATES_DROPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LISTEN_BACKLOG.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_COUNTRIES.clone()));
    let _ = REGISTRY.register(Box::new(HEALTH_ALERT.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapses a request path into a low-cardinality label.
pub fn categorize_endpoint(path: &str) -> &'static str {
    if path.starts_with("/v1/charts/history") {
        "chart_history"
    } else if path.starts_with("/v1/charts") {
        "charts"
    } else if path.starts_with("/v1/listens") {
        "listens"
    } else if path.starts_with("/v1/admin") {
        "admin"
    } else if path == "/" {
        "home"
    } else {
        "other"
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_listen_events(aggregated: usize, dropped: usize) {
    LISTEN_EVENTS_PROCESSED_TOTAL
        .with_label_values(&["aggregated"])
        .inc_by(aggregated as f64);
    LISTEN_EVENTS_PROCESSED_TOTAL
        .with_label_values(&["dropped"])
        .inc_by(dropped as f64);
}

pub fn record_failed_groups(count: usize) {
    AGGREGATION_GROUPS_FAILED_TOTAL.inc_by(count as f64);
}

pub fn record_chart_published(chart_type: &str, entries: usize, candidates_dropped: usize) {
    CHART_ENTRIES_WRITTEN_TOTAL
        .with_label_values(&[chart_type])
        .inc_by(entries as f64);
    CHART_CANDIDATES_DROPPED_TOTAL
        .with_label_values(&[chart_type])
        .inc_by(candidates_dropped as f64);
}

pub fn set_health(backlog: u64, active_countries: u64, alert: bool) {
    LISTEN_BACKLOG.set(backlog as f64);
    ACTIVE_COUNTRIES.set(active_countries as f64);
    HEALTH_ALERT.set(if alert { 1.0 } else { 0.0 });
}

pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok());
            if let Some(kb) = rss_kb {
                PROCESS_MEMORY_BYTES.set(kb * 1024.0);
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
