//! Occupancy estimator (C12): reconstructs HOME/AWAY/UNKNOWN from door and
//! presence events, plus a liveness check from heartbeat/ha_snapshot events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::RawEvent;

/// Reconstructed home/away state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OccupancyState {
    Home,
    Away,
    Unknown,
}

/// Rooms whose presence sensor is considered strong (unambiguous) evidence
/// of someone being home, and the single room an arriving resident is
/// expected to pass through (the front entry, typically).
#[derive(Debug, Clone)]
pub struct RoomClassification {
    pub strong_rooms: Vec<String>,
    pub primary_room: String,
}

/// Tunables for the estimator, per the design notes' defaults.
#[derive(Debug, Clone, Copy)]
pub struct OccupancyParams {
    pub exit_quiet_minutes: i64,
    pub entry_window_minutes: i64,
    pub open_close_max_seconds: i64,
    pub live_minutes: i64,
}

impl Default for OccupancyParams {
    fn default() -> Self {
        Self {
            exit_quiet_minutes: 60,
            entry_window_minutes: 7,
            open_close_max_seconds: 120,
            live_minutes: 30,
        }
    }
}

/// A completed front-door open-then-close sequence within
/// `open_close_max_seconds` of each other.
#[derive(Debug, Clone, Copy)]
struct ExitSequence {
    closed_at: DateTime<Utc>,
}

fn is_strong_room_presence_on(event: &RawEvent, strong_rooms: &[String]) -> bool {
    event.is_presence_on()
        && event
            .room()
            .map(|r| strong_rooms.iter().any(|s| s == r))
            .unwrap_or(false)
}

fn is_primary_room_presence_on(event: &RawEvent, primary_room: &str) -> bool {
    event.is_presence_on() && event.room() == Some(primary_room)
}

/// Last-known presence state (`on`/`off`) per room, reconstructed from an
/// ordered event slice: an `on` persists until that room's next `off`.
fn any_strong_room_on_at(events: &[RawEvent], strong_rooms: &[String], cutoff: DateTime<Utc>) -> bool {
    strong_rooms.iter().any(|room| {
        events
            .iter()
            .filter(|e| e.timestamp <= cutoff && e.room() == Some(room.as_str()))
            .filter(|e| e.is_presence_on() || e.is_presence_off())
            .last()
            .map(|e| e.is_presence_on())
            .unwrap_or(false)
    })
}

/// Find completed front-door exit sequences: an `open` followed by a
/// `closed` on the front door within `open_close_max_seconds`.
fn find_exit_sequences(events: &[RawEvent], open_close_max_seconds: i64) -> Vec<ExitSequence> {
    let mut sequences = Vec::new();
    let mut pending_open: Option<DateTime<Utc>> = None;
    for event in events {
        if !event.is_door() || event.door_name() != Some("front") {
            continue;
        }
        match event.state_lower().as_deref() {
            Some("open") => pending_open = Some(event.timestamp),
            Some("closed") | Some("close") => {
                if let Some(opened_at) = pending_open.take() {
                    if (event.timestamp - opened_at).num_seconds() <= open_close_max_seconds {
                        sequences.push(ExitSequence { closed_at: event.timestamp });
                    }
                }
            }
            _ => {}
        }
    }
    sequences
}

/// Find front-door `open` event timestamps, used for the AWAY -> HOME entry
/// check.
fn find_front_door_opens(events: &[RawEvent]) -> Vec<DateTime<Utc>> {
    events
        .iter()
        .filter(|e| e.is_door() && e.door_name() == Some("front") && e.is_door_open())
        .map(|e| e.timestamp)
        .collect()
}

/// Estimate occupancy state at `now` from `events` (door + presence,
/// ordered by timestamp ascending, covering at least
/// `[now - lookback, now]` where lookback comfortably exceeds
/// `exit_quiet_minutes + entry_window_minutes`).
pub fn estimate_occupancy(
    events: &[RawEvent],
    rooms: &RoomClassification,
    params: OccupancyParams,
    now: DateTime<Utc>,
) -> OccupancyState {
    if any_strong_room_on_at(events, &rooms.strong_rooms, now) {
        return OccupancyState::Home;
    }

    let exits = find_exit_sequences(events, params.open_close_max_seconds);
    let latest_exit = exits.iter().max_by_key(|s| s.closed_at);

    if let Some(exit) = latest_exit {
        let quiet_until = exit.closed_at + chrono::Duration::minutes(params.exit_quiet_minutes);
        let no_strong_evidence_after = !events
            .iter()
            .any(|e| e.timestamp > exit.closed_at && is_strong_room_presence_on(e, &rooms.strong_rooms));

        if now >= quiet_until && no_strong_evidence_after {
            let door_opens = find_front_door_opens(events);
            let reentered = door_opens.iter().any(|&opened_at| {
                opened_at > exit.closed_at
                    && events.iter().any(|e| {
                        is_primary_room_presence_on(e, &rooms.primary_room)
                            && e.timestamp >= opened_at
                            && e.timestamp <= opened_at + chrono::Duration::minutes(params.entry_window_minutes)
                    })
            });
            if !reentered {
                return OccupancyState::Away;
            }
        }
    }

    OccupancyState::Unknown
}

/// Whether the hub has been heard from recently via heartbeat/ha_snapshot.
pub fn is_live(events: &[RawEvent], now: DateTime<Utc>, live_minutes: i64) -> bool {
    events
        .iter()
        .filter(|e| matches!(e.category, crate::event::EventCategory::Heartbeat | crate::event::EventCategory::HaSnapshot))
        .any(|e| (now - e.timestamp).num_minutes() < live_minutes)
}
