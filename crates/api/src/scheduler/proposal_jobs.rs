//! Proposal miner and expiry scheduler jobs (C9/C10).

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agingos_domain::job_status::JobStatus;
use agingos_domain::proposal_miner::{
    mine_door_anomaly_burst, mine_mvp_bootstrap, mine_night_activity_early_signal, mine_night_activity_frequent,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::json;

use crate::AppState;

const MINER_JOB_KEY: &str = "proposal_miner";
const EXPIRY_JOB_KEY: &str = "proposal_expiry";
const MINER_INTERVAL_HOURS: i64 = 24;
const EXPIRY_INTERVAL_MINUTES: i64 = 10;
const MINER_LOOKBACK_DAYS: i64 = 14;
const ORG_ID: &str = "default";

async fn run_miner_once(state: &AppState) -> anyhow::Result<serde_json::Value> {
    let tz: Tz = Tz::from_str(&state.config.timezone)
        .map_err(|_| anyhow::anyhow!("invalid timezone: {}", state.config.timezone))?;
    let now = Utc::now();
    let since = now - chrono::Duration::days(MINER_LOOKBACK_DAYS);

    let episodes = state
        .anomaly_episodes
        .list(None, since, false, None, 10_000)
        .await?;

    let mut mined = Vec::new();
    mined.extend(mine_night_activity_early_signal(&episodes, tz, now));
    mined.extend(mine_door_anomaly_burst(&episodes, now));
    mined.extend(mine_mvp_bootstrap(&episodes, now));
    mined.extend(mine_night_activity_frequent(&episodes, tz, now));

    let subject_key = state.rule_config.scheduler_default_subject_key.clone();
    let count = mined.len();
    for proposal in &mined {
        state.proposals.upsert_mined(ORG_ID, &subject_key, proposal, now).await?;
    }

    Ok(json!({ "episodes_considered": episodes.len(), "proposals_mined": count }))
}

/// Runs once every 24 hours.
pub async fn run_miner_loop(state: Arc<AppState>) {
    let period = Duration::from_secs(MINER_INTERVAL_HOURS as u64 * 60 * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let started = Instant::now();
        let now = Utc::now();

        let mut status = state
            .job_status
            .get(MINER_JOB_KEY)
            .await
            .unwrap_or_else(|_| JobStatus::new(MINER_JOB_KEY));

        match run_miner_once(&state).await {
            Ok(summary) => status.record_ok(now, started.elapsed().as_millis() as i64, summary),
            Err(err) => {
                tracing::error!(job = MINER_JOB_KEY, error = %err, "scheduler job failed");
                status.record_error(now, started.elapsed().as_millis() as i64, err.to_string());
            }
        }

        if let Err(err) = state.job_status.save(&status).await {
            tracing::error!(job = MINER_JOB_KEY, error = %err, "failed to persist job status");
        }
    }
}

async fn run_expiry_once(state: &AppState) -> anyhow::Result<serde_json::Value> {
    let now = Utc::now();
    let expired = state.proposals.expire_testing_proposals(now).await?;
    Ok(json!({ "expired": expired }))
}

/// Runs every 10 minutes, auto-expiring TESTING proposals whose window has
/// lapsed back to NEW.
pub async fn run_expiry_loop(state: Arc<AppState>) {
    let period = Duration::from_secs(EXPIRY_INTERVAL_MINUTES as u64 * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let started = Instant::now();
        let now = Utc::now();

        let mut status = state
            .job_status
            .get(EXPIRY_JOB_KEY)
            .await
            .unwrap_or_else(|_| JobStatus::new(EXPIRY_JOB_KEY));

        match run_expiry_once(&state).await {
            Ok(summary) => status.record_ok(now, started.elapsed().as_millis() as i64, summary),
            Err(err) => {
                tracing::error!(job = EXPIRY_JOB_KEY, error = %err, "scheduler job failed");
                status.record_error(now, started.elapsed().as_millis() as i64, err.to_string());
            }
        }

        if let Err(err) = state.job_status.save(&status).await {
            tracing::error!(job = EXPIRY_JOB_KEY, error = %err, "failed to persist job status");
        }
    }
}
