//! Writes job lifecycle entries to the server store audit log.

use crate::server_store::{JobAuditEventType, ServerStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct JobAuditLogger {
    server_store: Arc<dyn ServerStore>,
    job_id: String,
    start_time: Instant,
}

impl JobAuditLogger {
    pub fn new(server_store: Arc<dyn ServerStore>, job_id: &str) -> Self {
        Self {
            server_store,
            job_id: job_id.to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn log_started(&self, details: Option<serde_json::Value>) {
        self.log(JobAuditEventType::Started, None, details.as_ref(), None);
    }

    pub fn log_completed(&self, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Completed,
            Some(self.elapsed_ms()),
            details.as_ref(),
            None,
        );
    }

    pub fn log_failed(&self, error: &str, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Failed,
            Some(self.elapsed_ms()),
            details.as_ref(),
            Some(error),
        );
    }

    pub fn log_progress(&self, details: serde_json::Value) {
        self.log(JobAuditEventType::Progress, None, Some(&details), None);
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }

    // Audit failures never fail the job
    fn log(
        &self,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) {
        if let Err(e) =
            self.server_store
                .log_job_audit(&self.job_id, event_type, duration_ms, details, error)
        {
            warn!("Failed to write audit entry for {}: {}", self.job_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_store::SqliteServerStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_records_lifecycle_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        let audit = JobAuditLogger::new(store.clone(), "cleanup");

        audit.log_started(None);
        audit.log_progress(json!({"step": "snapshots"}));
        audit.log_failed("boom", Some(json!({"deleted": 3})));

        let entries = store.get_job_audit_log_by_job("cleanup", 10, 0).unwrap();
        assert_eq!(entries.len(), 3);
        let failed = entries
            .iter()
            .find(|e| e.event_type == JobAuditEventType::Failed)
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.duration_ms.is_some());
        assert_eq!(failed.details, Some(json!({"deleted": 3})));
    }
}
