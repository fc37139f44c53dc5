//! Deviation read/ack/close endpoints (C6) and the unpersisted dry-run
//! evaluator endpoint (C5).

use std::sync::Arc;

use agingos_domain::DomainError;
use agingos_domain::deviation::{DeviationRecord, DeviationStatus, DeviationV1};
use agingos_domain::rules::RuleRegistry;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;

fn parse_status(raw: &str) -> Result<DeviationStatus, DomainError> {
    match raw.to_ascii_uppercase().as_str() {
        "OPEN" => Ok(DeviationStatus::Open),
        "ACK" => Ok(DeviationStatus::Ack),
        "CLOSED" => Ok(DeviationStatus::Closed),
        other => Err(DomainError::BadInput(format!("unknown deviation status: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListDeviationsQuery {
    pub status: Option<String>,
    pub subject_key: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /deviations`.
pub async fn list_deviations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDeviationsQuery>,
) -> Result<Json<Vec<DeviationRecord>>, DomainError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let status = params.status.as_deref().map(parse_status).transpose()?;
    let status_str = status.map(|s| match s {
        DeviationStatus::Open => "OPEN",
        DeviationStatus::Ack => "ACK",
        DeviationStatus::Closed => "CLOSED",
    });

    let records = state
        .deviations
        .list(status_str, params.subject_key.as_deref(), limit)
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
pub struct SetDeviationStatusRequest {
    pub status: String,
}

/// `PATCH /deviations/{id}`.
pub async fn set_deviation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetDeviationStatusRequest>,
) -> Result<Json<DeviationRecord>, DomainError> {
    let status = parse_status(&req.status)?;
    let record = state
        .deviations
        .set_status(id, status, Utc::now())
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("deviation {id} not found")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct EvaluateDeviationsQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// `GET /deviations/evaluate`: run every registered rule over `[since,
/// until)` and return the fresh findings without persisting them.
pub async fn evaluate_deviations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EvaluateDeviationsQuery>,
) -> Result<Json<Vec<DeviationV1>>, DomainError> {
    let now = Utc::now();
    let until = params.until.unwrap_or(now);
    let since = params.since.unwrap_or(until - chrono::Duration::hours(1));

    let registry = RuleRegistry::default();
    let findings = registry
        .evaluate(&state.events, since, until, now, None)
        .await?;
    Ok(Json(findings))
}
