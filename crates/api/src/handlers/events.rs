//! Event ingress and read-back (C2, boundary).

use std::sync::Arc;

use agingos_domain::DomainError;
use agingos_domain::event::{DEFAULT_EVENT_PAGE_LIMIT, EventCategory, EventQuery, EventReader, RawEvent};
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;

fn parse_category(raw: &str) -> Result<EventCategory, DomainError> {
    match raw {
        "motion" => Ok(EventCategory::Motion),
        "presence" => Ok(EventCategory::Presence),
        "door" => Ok(EventCategory::Door),
        "heartbeat" => Ok(EventCategory::Heartbeat),
        "ha_snapshot" => Ok(EventCategory::HaSnapshot),
        other => Err(DomainError::BadInput(format!("unknown event category: {other}"))),
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct IngestEventRequest {
    #[validate(length(min = 1, message = "id must not be empty"))]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `POST /event`: append one raw sensor event. Idempotent on `id`.
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestEventRequest>,
) -> Result<Json<RawEvent>, DomainError> {
    req.validate()
        .map_err(DomainError::from_validation_errors)?;
    let category = parse_category(&req.category)?;

    let event = RawEvent {
        id: req.id,
        timestamp: req.timestamp,
        category,
        payload: req.payload,
    };

    state
        .events
        .insert(&event)
        .await
        .map_err(|e| DomainError::Database(e.to_string()))?;

    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    pub category: Option<String>,
    pub room: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// `GET /events`: newest-first page over `[since, until)`, `until` defaulting
/// to `before` (or now) and `since` defaulting to seven days back from it.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListEventsQuery>,
) -> Result<Json<Vec<RawEvent>>, DomainError> {
    let limit = params.limit.unwrap_or(DEFAULT_EVENT_PAGE_LIMIT).clamp(1, 1000);
    let until = params.before.or(params.until).unwrap_or_else(Utc::now);
    let since = params.since.unwrap_or_else(|| until - chrono::Duration::days(7));
    let category = params.category.as_deref().map(parse_category).transpose()?;

    let mut events = state
        .events
        .query_events(
            since,
            until,
            EventQuery {
                category,
                room: params.room,
                limit: Some(limit),
            },
        )
        .await?;

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    Ok(Json(events))
}
