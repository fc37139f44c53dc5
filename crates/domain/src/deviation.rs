//! Rule-produced deviations (C5 output) and the persisted deviation
//! lifecycle policy (C6). The actual storage is in `agingos-storage`; this
//! module holds the pure value types and the upsert/sweep decision logic so
//! it can be unit tested without a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deviation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// Lifecycle status of a persisted deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviationStatus {
    Open,
    Ack,
    Closed,
}

/// The half-open evaluation window a deviation was computed over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Window {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// A pure, computed (not yet persisted) rule finding — the output of C5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationV1 {
    pub rule_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub title: String,
    pub explanation: String,
    pub evidence: Vec<String>,
    pub window: Window,
}

/// `{rule_id}:{subject_key}`, the natural key a deviation is upserted on.
pub fn deviation_key(rule_id: &str, subject_key: &str) -> String {
    format!("{rule_id}:{subject_key}")
}

/// A persisted deviation row, adding lifecycle fields to `DeviationV1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationRecord {
    pub deviation_id: Uuid,
    pub deviation_key: String,
    pub rule_id: String,
    pub subject_key: String,
    pub status: DeviationStatus,
    pub severity: Severity,
    pub title: String,
    pub explanation: String,
    pub evidence: Vec<String>,
    pub window_since: DateTime<Utc>,
    pub window_until: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counts of what an `upsert_deviations_v1` pass did.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PersistResult {
    pub created: usize,
    pub updated: usize,
    pub reopened: usize,
}

/// What the upsert policy decided to do with one incoming deviation,
/// relative to whatever row (if any) currently exists for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Create,
    /// Update content/timestamps; `reopen` is true if the row was CLOSED and
    /// must transition back to OPEN. ACK is preserved either way.
    Update { reopen: bool },
}

/// Decide what `upsert_deviations_v1` should do for one incoming deviation,
/// given the existing record (if any) at its key. Pure: no I/O, no clock.
pub fn decide_upsert(existing: Option<&DeviationRecord>) -> UpsertAction {
    match existing {
        None => UpsertAction::Create,
        Some(row) => UpsertAction::Update {
            reopen: row.status == DeviationStatus::Closed,
        },
    }
}

/// Apply a freshly computed `DeviationV1` onto an existing record in place,
/// per the upsert policy: content and `last_seen_at` always update; status
/// flips CLOSED -> OPEN on reopen, otherwise (including ACK) is untouched.
pub fn apply_resighting(row: &mut DeviationRecord, incoming: &DeviationV1, now: DateTime<Utc>) -> bool {
    let reopened = row.status == DeviationStatus::Closed;
    if reopened {
        row.status = DeviationStatus::Open;
        row.closed_at = None;
    }
    row.severity = incoming.severity;
    row.title = incoming.title.clone();
    row.explanation = incoming.explanation.clone();
    row.evidence = incoming.evidence.clone();
    row.window_since = incoming.window.since;
    row.window_until = incoming.window.until;
    row.last_seen_at = now;
    row.updated_at = now;
    reopened
}

/// Whether a record that was NOT re-seen this run is stale enough to close:
/// status is OPEN or ACK, and `last_seen_at` predates `now - expire_after`.
pub fn is_stale(row: &DeviationRecord, now: DateTime<Utc>, expire_after_minutes: i64) -> bool {
    matches!(row.status, DeviationStatus::Open | DeviationStatus::Ack)
        && row.last_seen_at < now - chrono::Duration::minutes(expire_after_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_window() -> Window {
        Window {
            since: Utc::now(),
            until: Utc::now(),
        }
    }

    fn sample_record(status: DeviationStatus, last_seen_at: DateTime<Utc>) -> DeviationRecord {
        let now = Utc::now();
        DeviationRecord {
            deviation_id: Uuid::new_v4(),
            deviation_key: deviation_key("R-001", "default"),
            rule_id: "R-001".to_string(),
            subject_key: "default".to_string(),
            status,
            severity: Severity::Medium,
            title: "t".to_string(),
            explanation: "e".to_string(),
            evidence: vec![],
            window_since: now,
            window_until: now,
            first_seen_at: now,
            last_seen_at,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn missing_row_is_created() {
        assert_eq!(decide_upsert(None), UpsertAction::Create);
    }

    #[test]
    fn closed_row_reopens_open_row_updates() {
        let closed = sample_record(DeviationStatus::Closed, Utc::now());
        assert_eq!(decide_upsert(Some(&closed)), UpsertAction::Update { reopen: true });

        let open = sample_record(DeviationStatus::Open, Utc::now());
        assert_eq!(decide_upsert(Some(&open)), UpsertAction::Update { reopen: false });
    }

    #[test]
    fn ack_is_preserved_across_resighting() {
        let mut row = sample_record(DeviationStatus::Ack, Utc::now() - chrono::Duration::hours(1));
        let now = Utc::now();
        let incoming = DeviationV1 {
            rule_id: "R-001".to_string(),
            timestamp: now,
            severity: Severity::High,
            title: "new".to_string(),
            explanation: "new explanation".to_string(),
            evidence: vec!["ev1".to_string()],
            window: sample_window(),
        };
        let reopened = apply_resighting(&mut row, &incoming, now);
        assert!(!reopened);
        assert_eq!(row.status, DeviationStatus::Ack);
        assert_eq!(row.last_seen_at, now);
        assert_eq!(row.severity, Severity::High);
    }

    #[test]
    fn stale_open_row_past_threshold_is_stale() {
        let now = Utc::now();
        let row = sample_record(DeviationStatus::Open, now - chrono::Duration::minutes(90));
        assert!(is_stale(&row, now, 60));
        assert!(!is_stale(&row, now, 120));
    }
}
