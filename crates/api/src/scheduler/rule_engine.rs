//! Rule engine scheduler job (C5/C6): evaluates each enabled rule over its
//! own lookback window, applies monitor-mode gating, and upserts/sweeps the
//! resulting deviations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agingos_domain::deviation::deviation_key;
use agingos_domain::job_status::JobStatus;
use agingos_domain::monitor_mode::{gate, GateAction};
use agingos_domain::rules::RuleRegistry;
use chrono::Utc;
use serde_json::json;

use crate::AppState;

const JOB_KEY: &str = "rule_engine";
const MONITOR_MODE_TAG: &str = "_monitor_mode=TEST";

async fn run_once(state: &AppState) -> anyhow::Result<serde_json::Value> {
    let registry = RuleRegistry::default();
    let now = Utc::now();
    let subject_key = state.rule_config.scheduler_default_subject_key.clone();

    let mut rules_run = Vec::new();
    let mut rules_failed = Vec::new();
    let mut persisted = 0usize;
    let mut suppressed = 0usize;

    for rule_id in registry.rule_ids() {
        if !state.rule_config.rule_enabled_in_scheduler(rule_id) {
            continue;
        }

        let result: anyhow::Result<(usize, usize)> = async {
            let lookback = state.rule_config.rule_lookback_minutes(rule_id);
            let since = now - chrono::Duration::minutes(lookback);
            let mode = state.monitor_modes.get(rule_id).await?;
            let action = gate(mode);

            let mut findings = registry
                .evaluate(&state.events, since, now, now, Some(&[rule_id]))
                .await?;

            if action == GateAction::Suppress {
                return Ok((0, findings.len()));
            }

            if action == GateAction::PersistTagged {
                for finding in &mut findings {
                    finding.evidence.push(MONITOR_MODE_TAG.to_string());
                }
            }

            state
                .deviations
                .upsert_deviations_v1(rule_id, &subject_key, &findings, now)
                .await?;

            let seen_keys = if findings.is_empty() {
                Vec::new()
            } else {
                vec![deviation_key(rule_id, &subject_key)]
            };
            let expire_after = state.rule_config.rule_expire_after_minutes(rule_id);
            state
                .deviations
                .close_stale_deviations_v1(rule_id, &subject_key, &seen_keys, expire_after, now)
                .await?;

            Ok((findings.len(), 0))
        }
        .await;

        rules_run.push(rule_id);
        match result {
            Ok((persisted_count, suppressed_count)) => {
                persisted += persisted_count;
                suppressed += suppressed_count;
            }
            Err(err) => {
                tracing::error!(rule_id, error = %err, "rule evaluation failed");
                rules_failed.push(rule_id);
            }
        }
    }

    Ok(json!({
        "rules_run": rules_run,
        "rules_failed": rules_failed,
        "persisted": persisted,
        "suppressed": suppressed,
    }))
}

/// Runs forever on `rule_config.scheduler_interval_minutes`, recording
/// `JobStatus` after every tick regardless of outcome.
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
