//! Raw sensor events and the read-only event store contract (C2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

/// The default page cap used by `EventReader::query_events`.
pub const DEFAULT_EVENT_PAGE_LIMIT: i64 = 1000;

/// Sensor event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Motion,
    Presence,
    Door,
    Heartbeat,
    HaSnapshot,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Motion => "motion",
            EventCategory::Presence => "presence",
            EventCategory::Door => "door",
            EventCategory::Heartbeat => "heartbeat",
            EventCategory::HaSnapshot => "ha_snapshot",
        }
    }
}

/// A raw, timestamped sensor event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    pub payload: Value,
}

impl RawEvent {
    /// `payload.room` or, failing that, `payload.area`.
    pub fn room(&self) -> Option<&str> {
        self.payload
            .get("room")
            .and_then(Value::as_str)
            .or_else(|| self.payload.get("area").and_then(Value::as_str))
    }

    /// `payload.entity_id`.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("entity_id").and_then(Value::as_str)
    }

    /// `payload.state` or, failing that, `payload.value`, lowercased.
    pub fn state_lower(&self) -> Option<String> {
        self.payload
            .get("state")
            .or_else(|| self.payload.get("value"))
            .and_then(Value::as_str)
            .map(|s| s.to_ascii_lowercase())
    }

    /// `payload.door` or, failing that, `payload.name`.
    pub fn door_name(&self) -> Option<&str> {
        self.payload
            .get("door")
            .and_then(Value::as_str)
            .or_else(|| self.payload.get("name").and_then(Value::as_str))
    }

    pub fn is_motion(&self) -> bool {
        self.category == EventCategory::Motion
    }

    pub fn is_door(&self) -> bool {
        self.category == EventCategory::Door
    }

    pub fn is_presence_on(&self) -> bool {
        self.category == EventCategory::Presence
            && matches!(
                self.state_lower().as_deref(),
                Some("on" | "true" | "1" | "home" | "occupied")
            )
    }

    pub fn is_presence_off(&self) -> bool {
        self.category == EventCategory::Presence
            && matches!(
                self.state_lower().as_deref(),
                Some("off" | "false" | "0" | "away" | "clear" | "not_occupied")
            )
    }

    pub fn is_door_open(&self) -> bool {
        self.is_door() && self.state_lower().as_deref() == Some("open")
    }

    pub fn is_motion_on(&self) -> bool {
        self.is_motion() && self.state_lower().as_deref() == Some("on")
    }
}

/// Filter applied to an `EventReader::query_events` call.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub category: Option<EventCategory>,
    pub room: Option<String>,
    pub limit: Option<i64>,
}

/// Read-only contract over the event store (C2). Implemented by a
/// SQLx-backed Postgres repository in `agingos-storage` and by an in-memory
/// fixture for unit tests that must not require a live database.
#[async_trait::async_trait]
pub trait EventReader: Send + Sync {
    /// Events with `timestamp in [since, until)`, ordered by `(timestamp, id)`
    /// ascending, capped at `query.limit.unwrap_or(DEFAULT_EVENT_PAGE_LIMIT)`.
    async fn query_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        query: EventQuery,
    ) -> Result<Vec<RawEvent>, DomainError>;
}

/// In-memory `EventReader` over a fixed, pre-sorted slice of events. Used by
/// rule-engine and episode-builder unit tests that exercise pure logic
/// without a database.
pub struct InMemoryEventReader {
    events: Vec<RawEvent>,
}

impl InMemoryEventReader {
    /// Events are sorted by `(timestamp, id)` on construction so the
    /// `(timestamp asc, id asc)` ordering invariant always holds.
    pub fn new(mut events: Vec<RawEvent>) -> Self {
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self { events }
    }
}

#[async_trait::async_trait]
impl EventReader for InMemoryEventReader {
    async fn query_events(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        query: EventQuery,
    ) -> Result<Vec<RawEvent>, DomainError> {
        let limit = query.limit.unwrap_or(DEFAULT_EVENT_PAGE_LIMIT) as usize;
        let filtered = self
            .events
            .iter()
            .filter(|e| e.timestamp >= since && e.timestamp < until)
            .filter(|e| query.category.map(|c| c == e.category).unwrap_or(true))
            .filter(|e| {
                query
                    .room
                    .as_deref()
                    .map(|r| e.room() == Some(r))
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(filtered)
    }
}
