//! Anomaly scoring scheduler job (C7/C8): scores the most recently finished
//! 15-minute bucket for every room seen in the lookback window and advances
//! each room's episode lifecycle with the result.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agingos_domain::anomaly::{score_missing_baseline_status, score_room_bucket, ScoreInput, ScoringWeights};
use agingos_domain::anomaly_episode::LifecycleConfig;
use agingos_domain::baseline::BaselineReader;
use agingos_domain::episode::build_episodes;
use agingos_domain::event::{EventCategory, EventQuery, EventReader};
use agingos_domain::job_status::JobStatus;
use agingos_domain::time::{bucket_idx_15m, dow, is_weekend, last_finished_bucket_start};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;

const JOB_KEY: &str = "anomaly_scoring";
const EPISODE_LOOKBACK_HOURS: i64 = 48;

/// Single-tenant placeholder: the baseline tables are keyed by `user_id` but
/// this system has exactly one subject.
const BASELINE_USER_ID: Uuid = Uuid::nil();

async fn run_once(state: &AppState) -> anyhow::Result<serde_json::Value> {
    let tz: Tz = Tz::from_str(&state.config.timezone)
        .map_err(|_| anyhow::anyhow!("invalid timezone: {}", state.config.timezone))?;
    let now = Utc::now();
    let bucket_start = last_finished_bucket_start(now, tz);
    let bucket_end = bucket_start + chrono::Duration::minutes(15);

    let lookback_since = bucket_start - chrono::Duration::hours(EPISODE_LOOKBACK_HOURS);
    let events = state
        .events
        .query_events(
            lookback_since,
            bucket_end,
            EventQuery {
                category: None,
                room: None,
                limit: Some(5000),
            },
        )
        .await?;
    let episodes = build_episodes(&events, tz);

    let rooms: BTreeSet<String> = episodes
        .iter()
        .filter(|e| e.start_ts < bucket_end && e.end_ts > lookback_since)
        .map(|e| e.room.clone())
        .collect();

    let model_end = state.baselines.latest_model_end(BASELINE_USER_ID).await?;
    let weights = ScoringWeights::default();
    let bucket_idx = bucket_idx_15m(bucket_start, tz);
    let dow_val = dow(bucket_start, tz);
    let is_weekend_val = is_weekend(dow_val);

    let mut scored = 0usize;
    let mut failed = Vec::new();

    for room in &rooms {
        let result: anyhow::Result<()> = async {
            let score = match model_end {
                None => score_missing_baseline_status(room, bucket_start, tz),
                Some(model_end) => {
                    let observed_activity =
                        agingos_domain::anomaly::observed_activity(&episodes, bucket_start, bucket_end, weights);
                    let door_events = state
                        .events
                        .query_events(
                            bucket_start,
                            bucket_end,
                            EventQuery {
                                category: Some(EventCategory::Door),
                                room: Some(room.clone()),
                                limit: Some(1000),
                            },
                        )
                        .await?;

                    let prev_room = agingos_domain::anomaly::prev_room(&episodes, bucket_start);
                    let room_bucket = state
                        .baselines
                        .room_bucket(BASELINE_USER_ID, model_end, room, bucket_idx, dow_val, is_weekend_val)
                        .await?;
                    let transition = match prev_room {
                        Some(prev) if prev != room.as_str() => {
                            state
                                .baselines
                                .transition(BASELINE_USER_ID, model_end, prev, room, bucket_idx, dow_val, is_weekend_val)
                                .await?
                        }
                        _ => None,
                    };

                    score_room_bucket(ScoreInput {
                        room: room.as_str(),
                        bucket_start,
                        observed_activity,
                        observed_door_events: door_events.len() as i64,
                        prev_room,
                        room_bucket: room_bucket.as_ref(),
                        transition: transition.as_ref(),
                        weights,
                        tz,
                    })
                }
            };

            state
                .anomaly_episodes
                .advance(&score, now, LifecycleConfig::default())
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => scored += 1,
            Err(err) => {
                tracing::error!(room = %room, error = %err, "anomaly scoring failed for room");
                failed.push(room.clone());
            }
        }
    }

    Ok(json!({
        "bucket_start": bucket_start,
        "rooms_scored": scored,
        "rooms_failed": failed,
        "has_baseline": model_end.is_some(),
    }))
}

/// Runs forever on `rule_config.scheduler_interval_minutes`, recording
/// `JobStatus` after every tick regardless of outcome. Per-room failures are
/// caught inside `run_once` so one room's error never drops the rest.
pub async fn run_loop(state: Arc<AppState>) {
    let period = Duration::from_secs(state.rule_config.scheduler_interval_minutes.max(1) as u64 * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let started = Instant::now();
        let now = Utc::now();

        let mut status = state
            .job_status
            .get(JOB_KEY)
            .await
            .unwrap_or_else(|_| JobStatus::new(JOB_KEY));

        match run_once(&state).await {
            Ok(summary) => status.record_ok(now, started.elapsed().as_millis() as i64, summary),
            Err(err) => {
                tracing::error!(job = JOB_KEY, error = %err, "scheduler job failed");
                status.record_error(now, started.elapsed().as_millis() as i64, err.to_string());
            }
        }

        if let Err(err) = state.job_status.save(&status).await {
            tracing::error!(job = JOB_KEY, error = %err, "failed to persist job status");
        }
    }
}
