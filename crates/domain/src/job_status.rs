//! Scheduler job health, persisted so operators can see job state across
//! restarts without parsing logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per scheduler job, keyed by `job_key` (e.g. `"rule_engine"`,
/// `"anomaly_scorer"`, `"proposal_miner"`, `"proposal_expiry"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_key: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub last_duration_ms: Option<i64>,
    pub last_summary: serde_json::Value,
}

impl JobStatus {
    pub fn new(job_key: impl Into<String>) -> Self {
        Self {
            job_key: job_key.into(),
            last_run_at: None,
            last_ok_at: None,
            last_error_at: None,
            last_error_message: None,
            last_duration_ms: None,
            last_summary: serde_json::json!({}),
        }
    }

    /// Record a successful run.
    pub fn record_ok(&mut self, at: DateTime<Utc>, duration_ms: i64, summary: serde_json::Value) {
        self.last_run_at = Some(at);
        self.last_ok_at = Some(at);
        self.last_duration_ms = Some(duration_ms);
        self.last_summary = summary;
    }

    /// Record a failed run. The job's `last_run_at` still advances so a
    /// stuck job is distinguishable from one that hasn't fired at all.
    pub fn record_error(&mut self, at: DateTime<Utc>, duration_ms: i64, message: impl Into<String>) {
        self.last_run_at = Some(at);
        self.last_error_at = Some(at);
        self.last_duration_ms = Some(duration_ms);
        self.last_error_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ok_clears_nothing_but_advances_run_and_ok() {
        let mut status = JobStatus::new("rule_engine");
        let t = Utc::now();
        status.record_ok(t, 120, serde_json::json!({"deviations": 3}));
        assert_eq!(status.last_run_at, Some(t));
        assert_eq!(status.last_ok_at, Some(t));
        assert!(status.last_error_message.is_none());
    }

    #[test]
    fn record_error_advances_run_but_not_ok() {
        let mut status = JobStatus::new("rule_engine");
        let t = Utc::now();
        status.record_error(t, 50, "boom");
        assert_eq!(status.last_run_at, Some(t));
        assert!(status.last_ok_at.is_none());
        assert_eq!(status.last_error_message.as_deref(), Some("boom"));
    }
}
