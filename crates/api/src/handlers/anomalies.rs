//! Anomaly episode read endpoint (C8).

use std::sync::Arc;

use agingos_domain::DomainError;
use agingos_domain::anomaly::AnomalyLevel;
use agingos_domain::anomaly_episode::AnomalyEpisodeState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::AppState;

const DEFAULT_ANOMALIES_LIMIT: i64 = 100;

fn parse_level(raw: &str) -> Result<AnomalyLevel, DomainError> {
    match raw.to_ascii_uppercase().as_str() {
        "GREEN" => Ok(AnomalyLevel::Green),
        "YELLOW" => Ok(AnomalyLevel::Yellow),
        "RED" => Ok(AnomalyLevel::Red),
        other => Err(DomainError::BadInput(format!("unknown anomaly level: {other}"))),
    }
}

/// Parse a lookback window like `24h`, `30m`, `7d` into a `chrono::Duration`.
fn parse_lookback(raw: &str) -> Result<chrono::Duration, DomainError> {
    let raw = raw.trim();
    let (value, unit) = raw.split_at(raw.len() - 1);
    let value: i64 = value
        .parse()
        .map_err(|_| DomainError::BadInput(format!("invalid lookback window: {raw}")))?;

    match unit {
        "m" => Ok(chrono::Duration::minutes(value)),
        "h" => Ok(chrono::Duration::hours(value)),
        "d" => Ok(chrono::Duration::days(value)),
        _ => Err(DomainError::BadInput(format!("invalid lookback window: {raw}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListAnomaliesQuery {
    pub last: Option<String>,
    pub room: Option<String>,
    #[serde(default)]
    pub active_only: bool,
    pub min_level: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /anomalies`.
pub async fn list_anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListAnomaliesQuery>,
) -> Result<Json<Vec<AnomalyEpisodeState>>, DomainError> {
    let limit = params.limit.unwrap_or(DEFAULT_ANOMALIES_LIMIT).clamp(1, 1000);
    let lookback = params
        .last
        .as_deref()
        .map(parse_lookback)
        .transpose()?
        .unwrap_or_else(|| chrono::Duration::hours(24));
    let since = Utc::now() - lookback;
    let min_level = params.min_level.as_deref().map(parse_level).transpose()?;

    let episodes = state
        .anomaly_episodes
        .list(params.room.as_deref(), since, params.active_only, min_level, limit)
        .await?;

    Ok(Json(episodes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lookback_accepts_minutes_hours_days() {
        assert_eq!(parse_lookback("30m").unwrap(), chrono::Duration::minutes(30));
        assert_eq!(parse_lookback("24h").unwrap(), chrono::Duration::hours(24));
        assert_eq!(parse_lookback("7d").unwrap(), chrono::Duration::days(7));
    }

    #[test]
    fn parse_lookback_rejects_unknown_unit() {
        assert!(parse_lookback("24x").is_err());
        assert!(parse_lookback("").is_err());
    }

    #[test]
    fn parse_level_is_case_insensitive() {
        assert_eq!(parse_level("yellow").unwrap(), AnomalyLevel::Yellow);
        assert_eq!(parse_level("RED").unwrap(), AnomalyLevel::Red);
        assert!(parse_level("ORANGE").is_err());
    }
}
