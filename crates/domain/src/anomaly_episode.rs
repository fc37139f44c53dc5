//! Anomaly episode lifecycle (C8): per-room open/update/close state machine
//! driven by debounced green streaks and an inactivity timeout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::{AnomalyLevel, BucketScore, ScoreReason};

/// Why an anomaly episode closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyCloseReason {
    GreenStreak,
    Timeout,
}

/// Tunables for the episode-close decision.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub close_timeout_minutes: i64,
    pub close_green_n: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            close_timeout_minutes: 90,
            close_green_n: 2,
        }
    }
}

/// Per-room anomaly episode state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEpisodeState {
    pub room: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub level: AnomalyLevel,
    pub score_total: f64,
    pub score_intensity: f64,
    pub score_sequence: f64,
    pub score_event: f64,
    pub peak_bucket: DateTime<Utc>,
    pub peak_score: f64,
    pub reasons_peak: Vec<ScoreReason>,
    pub reasons_last: Vec<ScoreReason>,
    pub start_bucket: DateTime<Utc>,
    pub last_bucket: DateTime<Utc>,
    pub bucket_count: i64,
    pub green_streak: u32,
    pub closed_reason: Option<AnomalyCloseReason>,
}

/// What `process_bucket_score` decided happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeAction {
    Noop,
    Opened,
    Updated,
    Closed,
}

/// Result of processing one bucket against the current state (if any).
pub struct ProcessResult {
    pub action: EpisodeAction,
    /// The state after processing. `None` only when there was no active
    /// episode and the bucket stayed GREEN (a true no-op with nothing to
    /// persist).
    pub state: Option<AnomalyEpisodeState>,
}

/// Advance the per-room anomaly episode state machine by one bucket.
/// `existing` must be `Some` only when that room currently has an active
/// (`end_ts = None`) episode. Idempotent: calling this twice with the same
/// `bucket.bucket_start` against the state it already produced is a no-op.
pub fn process_bucket_score(
    existing: Option<AnomalyEpisodeState>,
    bucket: &BucketScore,
    now: DateTime<Utc>,
    config: LifecycleConfig,
) -> ProcessResult {
    match existing {
        None => {
            if bucket.level == AnomalyLevel::Green {
                return ProcessResult { action: EpisodeAction::Noop, state: None };
            }
            let state = AnomalyEpisodeState {
                room: bucket.room.clone(),
                start_ts: bucket.bucket_start,
                end_ts: None,
                level: bucket.level,
                score_total: bucket.score_total,
                score_intensity: bucket.score_intensity,
                score_sequence: bucket.score_sequence,
                score_event: bucket.score_event,
                peak_bucket: bucket.bucket_start,
                peak_score: bucket.score_total,
                reasons_peak: bucket.reasons.clone(),
                reasons_last: bucket.reasons.clone(),
                start_bucket: bucket.bucket_start,
                last_bucket: bucket.bucket_start,
                bucket_count: 1,
                green_streak: 0,
                closed_reason: None,
            };
            ProcessResult { action: EpisodeAction::Opened, state: Some(state) }
        }
        Some(mut state) => {
            if bucket.bucket_start <= state.last_bucket {
                return ProcessResult { action: EpisodeAction::Noop, state: Some(state) };
            }

            state.last_bucket = bucket.bucket_start;
            state.bucket_count += 1;
            state.level = bucket.level;
            state.score_total = bucket.score_total;
            state.score_intensity = bucket.score_intensity;
            state.score_sequence = bucket.score_sequence;
            state.score_event = bucket.score_event;
            state.reasons_last = bucket.reasons.clone();

            if bucket.score_total > state.peak_score {
                state.peak_score = bucket.score_total;
                state.peak_bucket = bucket.bucket_start;
                state.reasons_peak = bucket.reasons.clone();
            }

            if bucket.level == AnomalyLevel::Green {
                state.green_streak += 1;
            } else {
                state.green_streak = 0;
            }

            let timed_out =
                (now - state.last_bucket).num_minutes() >= config.close_timeout_minutes;
            let green_streak_done = state.green_streak >= config.close_green_n;

            if timed_out {
                state.end_ts = Some(bucket.bucket_end);
                state.closed_reason = Some(AnomalyCloseReason::Timeout);
                ProcessResult { action: EpisodeAction::Closed, state: Some(state) }
            } else if green_streak_done {
                state.end_ts = Some(bucket.bucket_end);
                state.closed_reason = Some(AnomalyCloseReason::GreenStreak);
                ProcessResult { action: EpisodeAction::Closed, state: Some(state) }
            } else {
                ProcessResult { action: EpisodeAction::Updated, state: Some(state) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn bucket(room: &str, start: DateTime<Utc>, level: AnomalyLevel, score: f64) -> BucketScore {
        BucketScore {
            room: room.to_string(),
            bucket_start: start,
            bucket_end: start + chrono::Duration::minutes(15),
            dow: 0,
            is_weekend: false,
            bucket_idx: 0,
            score_total: score,
            score_intensity: score,
            score_sequence: 0.0,
            score_event: 0.0,
            level,
            reasons: vec![ScoreReason { code: "TEST".to_string(), detail: json!({}) }],
            details: json!({}),
        }
    }

    #[test]
    fn no_active_episode_green_is_noop() {
        let b = bucket("kitchen", Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(), AnomalyLevel::Green, 0.0);
        let result = process_bucket_score(None, &b, b.bucket_start, LifecycleConfig::default());
        assert_eq!(result.action, EpisodeAction::Noop);
        assert!(result.state.is_none());
    }

    #[test]
    fn no_active_episode_yellow_opens() {
        let b = bucket("kitchen", Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(), AnomalyLevel::Yellow, 2.3);
        let result = process_bucket_score(None, &b, b.bucket_start, LifecycleConfig::default());
        assert_eq!(result.action, EpisodeAction::Opened);
        let state = result.state.unwrap();
        assert_eq!(state.start_bucket, b.bucket_start);
        assert_eq!(state.green_streak, 0);
        assert_eq!(state.bucket_count, 1);
    }

    #[test]
    fn s5_green_streak_closes_after_configured_count() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let config = LifecycleConfig { close_timeout_minutes: 90, close_green_n: 2 };

        let b0 = bucket("kitchen", t0, AnomalyLevel::Yellow, 2.3);
        let r0 = process_bucket_score(None, &b0, t0, config);
        assert_eq!(r0.action, EpisodeAction::Opened);

        let t1 = t0 + chrono::Duration::minutes(15);
        let b1 = bucket("kitchen", t1, AnomalyLevel::Red, 5.0);
        let r1 = process_bucket_score(r0.state, &b1, t1, config);
        assert_eq!(r1.action, EpisodeAction::Updated);
        assert_eq!(r1.state.as_ref().unwrap().peak_score, 5.0);
        assert_eq!(r1.state.as_ref().unwrap().peak_bucket, t1);

        let t2 = t0 + chrono::Duration::minutes(30);
        let b2 = bucket("kitchen", t2, AnomalyLevel::Green, 0.2);
        let r2 = process_bucket_score(r1.state, &b2, t2, config);
        assert_eq!(r2.action, EpisodeAction::Updated);
        assert_eq!(r2.state.as_ref().unwrap().green_streak, 1);

        let t3 = t0 + chrono::Duration::minutes(45);
        let b3 = bucket("kitchen", t3, AnomalyLevel::Green, 0.1);
        let r3 = process_bucket_score(r2.state, &b3, t3, config);
        assert_eq!(r3.action, EpisodeAction::Closed);
        let final_state = r3.state.unwrap();
        assert_eq!(final_state.closed_reason, Some(AnomalyCloseReason::GreenStreak));
        assert_eq!(final_state.end_ts, Some(t3 + chrono::Duration::minutes(15)));
        assert_eq!(final_state.peak_score, 5.0);
    }

    #[test]
    fn timeout_takes_precedence_over_green_streak() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let config = LifecycleConfig { close_timeout_minutes: 10, close_green_n: 5 };
        let b0 = bucket("kitchen", t0, AnomalyLevel::Yellow, 2.3);
        let r0 = process_bucket_score(None, &b0, t0, config);

        let t1 = t0 + chrono::Duration::minutes(15);
        let b1 = bucket("kitchen", t1, AnomalyLevel::Green, 0.1);
        // now far past last_bucket -> timeout, even though green_streak=1 < close_green_n=5
        let r1 = process_bucket_score(r0.state, &b1, t1 + chrono::Duration::minutes(20), config);
        assert_eq!(r1.action, EpisodeAction::Closed);
        assert_eq!(r1.state.unwrap().closed_reason, Some(AnomalyCloseReason::Timeout));
    }

    #[test]
    fn idempotent_on_repeated_bucket_start() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let config = LifecycleConfig::default();
        let b0 = bucket("kitchen", t0, AnomalyLevel::Yellow, 2.3);
        let r0 = process_bucket_score(None, &b0, t0, config);
        let state_after_first = r0.state.unwrap();

        let r1 = process_bucket_score(Some(state_after_first.clone()), &b0, t0, config);
        assert_eq!(r1.action, EpisodeAction::Noop);
        assert_eq!(r1.state.unwrap().bucket_count, state_after_first.bucket_count);
    }
}
