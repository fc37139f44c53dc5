//! Episode builder (C3): segments raw events into per-room episodes and
//! classifies each one as human / pet / unknown with explainable reasons.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::event::RawEvent;
use crate::time::{iso_weekday, tod_bucket_utc};
use chrono_tz::Tz;

/// Why an episode closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeCloseReason {
    OffEvent,
    Timeout,
}

/// Confidence in the episode's event coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeQuality {
    High,
    Medium,
    Low,
}

/// Classifier output label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeClass {
    Human,
    Pet,
    Unknown,
}

/// A single explainable classifier reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierReason {
    pub code: String,
    pub direction: String,
    pub weight: f64,
    pub evidence: Value,
}

/// Identity used to deduplicate reasons: `(code, direction, evidence repr)`.
fn reason_key(reason: &ClassifierReason) -> (String, String, String) {
    (
        reason.code.clone(),
        reason.direction.clone(),
        reason.evidence.to_string(),
    )
}

/// A finished, classified, per-room activity segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub room: String,
    pub primary_sensor: String,
    pub sensor_set: Vec<String>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub duration_s: i64,
    pub event_count_total: i64,
    pub event_count_motion: i64,
    pub event_count_presence_on: i64,
    pub event_count_presence_off: i64,
    pub event_rate_per_min: f64,
    pub close_reason: EpisodeCloseReason,
    pub timeout_s: i64,
    pub quality: EpisodeQuality,
    pub quality_flags: Vec<String>,
    pub first_event_id: String,
    pub last_event_id: String,
    pub door_before_s: Option<i64>,
    pub door_during: bool,
    pub door_after_s: Option<i64>,
    pub tod_bucket: String,
    pub weekday: u32,
    pub class: EpisodeClass,
    pub p_human: f64,
    pub p_pet: f64,
    pub p_unknown: f64,
    pub reasons: Vec<ClassifierReason>,
    pub reason_summary: String,
    pub classifier_version: String,
}

const DEFAULT_TIMEOUT_NO_PRESENCE_S: i64 = 90;
const DEFAULT_TIMEOUT_WITH_PRESENCE_S: i64 = 180;
const DOOR_CONTEXT_WINDOW_S: i64 = 60;

/// Mutable in-progress episode, one per room with activity currently open.
struct EpisodeDraft {
    room: String,
    primary_sensor: String,
    sensor_set: HashSet<String>,
    start_ts: DateTime<Utc>,
    last_activity_ts: DateTime<Utc>,
    end_ts: Option<DateTime<Utc>>,
    total: i64,
    motion: i64,
    presence_on: i64,
    presence_off: i64,
    first_event_id: String,
    last_event_id: String,
    saw_presence_on: bool,
    close_reason: Option<EpisodeCloseReason>,
    quality: EpisodeQuality,
    quality_flags: Vec<String>,
}

impl EpisodeDraft {
    fn timeout_s(&self) -> i64 {
        if self.saw_presence_on {
            DEFAULT_TIMEOUT_WITH_PRESENCE_S
        } else {
            DEFAULT_TIMEOUT_NO_PRESENCE_S
        }
    }

    fn close(&mut self, end_ts: DateTime<Utc>, reason: EpisodeCloseReason) {
        self.end_ts = Some(end_ts);
        self.close_reason = Some(reason);
        match reason {
            EpisodeCloseReason::OffEvent => {
                if !self.quality_flags.iter().any(|f| f == "missing_off") {
                    self.quality = EpisodeQuality::High;
                }
            }
            EpisodeCloseReason::Timeout => {
                self.quality = EpisodeQuality::Low;
                self.quality_flags.push("missing_off".to_string());
            }
        }
    }
}

/// Segment `events` (assumed already sorted by `(timestamp, id)`) into
/// finished, classified episodes. `now` only matters for determining whether
/// any trailing open episode needs an end-of-stream close, and is normally
/// the timestamp of the last event (or later).
pub fn build_episodes(events: &[RawEvent], tz: Tz) -> Vec<Episode> {
    let mut open_by_room: HashMap<String, EpisodeDraft> = HashMap::new();
    let mut door_events_by_room: HashMap<String, Vec<&RawEvent>> = HashMap::new();
    let mut finished: Vec<EpisodeDraft> = Vec::new();

    for event in events {
        let Some(room) = event.room() else { continue };

        maybe_timeout_close(&mut open_by_room, &mut finished, room, event.timestamp);

        if event.is_door() {
            door_events_by_room
                .entry(room.to_string())
                .or_default()
                .push(event);
            if let Some(draft) = open_by_room.get_mut(room) {
                draft.last_event_id = event.id.clone();
            }
            continue;
        }

        if !event.is_motion() && !event.is_presence_on() && !event.is_presence_off() {
            continue;
        }

        if let Some(draft) = open_by_room.get_mut(room) {
            draft.total += 1;
            draft.last_event_id = event.id.clone();
            if let Some(entity) = event.entity_id() {
                draft.sensor_set.insert(entity.to_string());
            }

            if event.is_motion() {
                draft.motion += 1;
                draft.last_activity_ts = event.timestamp;
            } else if event.is_presence_on() {
                draft.presence_on += 1;
                draft.saw_presence_on = true;
                draft.last_activity_ts = event.timestamp;
            } else if event.is_presence_off() {
                draft.presence_off += 1;
                if draft.saw_presence_on {
                    draft.close(event.timestamp, EpisodeCloseReason::OffEvent);
                    if let Some(done) = open_by_room.remove(room) {
                        finished.push(done);
                    }
                }
            }
        } else if event.is_presence_on() || event.is_motion() {
            let quality = if event.is_presence_on() {
                EpisodeQuality::High
            } else {
                EpisodeQuality::Medium
            };
            let mut sensor_set = HashSet::new();
            if let Some(entity) = event.entity_id() {
                sensor_set.insert(entity.to_string());
            }
            open_by_room.insert(
                room.to_string(),
                EpisodeDraft {
                    room: room.to_string(),
                    primary_sensor: event
                        .entity_id()
                        .map(str::to_string)
                        .unwrap_or_else(|| event.category.as_str().to_string()),
                    sensor_set,
                    start_ts: event.timestamp,
                    last_activity_ts: event.timestamp,
                    end_ts: None,
                    total: 1,
                    motion: if event.is_motion() { 1 } else { 0 },
                    presence_on: if event.is_presence_on() { 1 } else { 0 },
                    presence_off: 0,
                    first_event_id: event.id.clone(),
                    last_event_id: event.id.clone(),
                    saw_presence_on: event.is_presence_on(),
                    close_reason: None,
                    quality,
                    quality_flags: Vec::new(),
                },
            );
        }
    }

    // End-of-stream: force-close every still-open episode using the same
    // timeout-close arithmetic, evaluated against its own last activity
    // instant so the gap always clears the threshold. No magic duration.
    let rooms: Vec<String> = open_by_room.keys().cloned().collect();
    for room in rooms {
        if let Some(mut draft) = open_by_room.remove(&room) {
            let timeout = draft.timeout_s();
            let close_at = draft.last_activity_ts + chrono::Duration::seconds(timeout);
            draft.close(close_at, EpisodeCloseReason::Timeout);
            finished.push(draft);
        }
    }

    finished
        .into_iter()
        .map(|draft| finalize_episode(draft, &door_events_by_room, tz))
        .collect()
}

fn maybe_timeout_close(
    open_by_room: &mut HashMap<String, EpisodeDraft>,
    finished: &mut Vec<EpisodeDraft>,
    room: &str,
    now: DateTime<Utc>,
) {
    let should_close = match open_by_room.get(room) {
        Some(draft) => (now - draft.last_activity_ts).num_seconds() >= draft.timeout_s(),
        None => false,
    };
    if should_close {
        if let Some(mut draft) = open_by_room.remove(room) {
            let timeout = draft.timeout_s();
            let close_at = draft.last_activity_ts + chrono::Duration::seconds(timeout);
            draft.close(close_at, EpisodeCloseReason::Timeout);
            finished.push(draft);
        }
    }
}

fn finalize_episode(
    draft: EpisodeDraft,
    door_events_by_room: &HashMap<String, Vec<&RawEvent>>,
    tz: Tz,
) -> Episode {
    let end_ts = draft.end_ts.expect("draft must be closed before finalizing");
    let duration_s = (end_ts - draft.start_ts).num_seconds().max(0);
    let event_rate_per_min = if duration_s > 0 {
        (draft.total as f64) / (duration_s as f64 / 60.0)
    } else {
        draft.total as f64
    };

    let (door_before_s, door_during, door_after_s) = door_context(
        door_events_by_room.get(&draft.room).map(Vec::as_slice).unwrap_or(&[]),
        draft.start_ts,
        end_ts,
    );

    let mut episode = Episode {
        room: draft.room,
        primary_sensor: draft.primary_sensor,
        sensor_set: {
            let mut v: Vec<String> = draft.sensor_set.into_iter().collect();
            v.sort();
            v
        },
        start_ts: draft.start_ts,
        end_ts,
        duration_s,
        event_count_total: draft.total,
        event_count_motion: draft.motion,
        event_count_presence_on: draft.presence_on,
        event_count_presence_off: draft.presence_off,
        event_rate_per_min,
        close_reason: draft.close_reason.expect("closed"),
        timeout_s: draft.timeout_s(),
        quality: draft.quality,
        quality_flags: draft.quality_flags,
        first_event_id: draft.first_event_id,
        last_event_id: draft.last_event_id,
        door_before_s,
        door_during,
        door_after_s,
        tod_bucket: tod_bucket_utc(draft.start_ts).to_string(),
        weekday: iso_weekday(draft.start_ts, tz),
        class: EpisodeClass::Unknown,
        p_human: 0.0,
        p_pet: 0.0,
        p_unknown: 1.0,
        reasons: Vec::new(),
        reason_summary: String::new(),
        classifier_version: "rules_v1".to_string(),
    };

    classify_episode(&mut episode);
    episode
}

/// Nearest door event within `DOOR_CONTEXT_WINDOW_S` before `start_ts` /
/// after `end_ts`, plus whether any door event falls within `[start, end]`.
fn door_context(
    door_events: &[&RawEvent],
    start_ts: DateTime<Utc>,
    end_ts: DateTime<Utc>,
) -> (Option<i64>, bool, Option<i64>) {
    let window = chrono::Duration::seconds(DOOR_CONTEXT_WINDOW_S);

    let door_before_s = door_events
        .iter()
        .filter(|e| e.timestamp <= start_ts && e.timestamp >= start_ts - window)
        .map(|e| (start_ts - e.timestamp).num_seconds())
        .min();

    let door_after_s = door_events
        .iter()
        .filter(|e| e.timestamp >= end_ts && e.timestamp <= end_ts + window)
        .map(|e| (e.timestamp - end_ts).num_seconds())
        .min();

    let door_during = door_events
        .iter()
        .any(|e| e.timestamp >= start_ts && e.timestamp <= end_ts);

    (door_before_s, door_during, door_after_s)
}

/// The rules_v1 classifier: accumulates nonnegative component scores and
/// picks human / pet / unknown with a confidence-margin guard.
fn classify_episode(episode: &mut Episode) {
    let mut s_h = 0.0_f64;
    let mut s_p = 0.0_f64;
    let mut s_u = 0.40_f64;
    let mut reasons: Vec<ClassifierReason> = Vec::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();

    let mut push = |reasons: &mut Vec<ClassifierReason>, seen: &mut HashSet<_>, reason: ClassifierReason| {
        let key = reason_key(&reason);
        if seen.insert(key) {
            reasons.push(reason);
        }
    };

    let door_near = episode.door_before_s.map(|s| s <= 60).unwrap_or(false)
        || episode.door_during
        || episode.door_after_s.map(|s| s <= 60).unwrap_or(false);

    if let Some(s) = episode.door_before_s {
        if s <= 60 {
            s_h += 0.55;
            push(
                &mut reasons,
                &mut seen,
                ClassifierReason {
                    code: "DOOR_BEFORE_START".to_string(),
                    direction: "human".to_string(),
                    weight: 0.55,
                    evidence: json!({ "door_before_s": s }),
                },
            );
        }
    }

    if episode.door_during {
        s_h += 0.35;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "DOOR_DURING_EPISODE".to_string(),
                direction: "human".to_string(),
                weight: 0.35,
                evidence: json!({ "door_during": true }),
            },
        );
    }

    if let Some(s) = episode.door_after_s {
        if s <= 60 {
            s_h += 0.20;
            push(
                &mut reasons,
                &mut seen,
                ClassifierReason {
                    code: "DOOR_AFTER_END".to_string(),
                    direction: "human".to_string(),
                    weight: 0.20,
                    evidence: json!({ "door_after_s": s }),
                },
            );
        }
    }

    if episode.close_reason == EpisodeCloseReason::Timeout {
        s_u += 0.25;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "TIMEOUT_CLOSE".to_string(),
                direction: "unknown".to_string(),
                weight: 0.25,
                evidence: json!({ "close_reason": "timeout" }),
            },
        );
    }

    let saw_presence_complete =
        episode.event_count_presence_on >= 1 && episode.event_count_presence_off >= 1;

    if !door_near && saw_presence_complete && episode.duration_s <= 12 {
        s_p += 0.35;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "PRESENCE_BLIP_VERY_SHORT_NO_DOOR".to_string(),
                direction: "pet".to_string(),
                weight: 0.35,
                evidence: json!({ "duration_s": episode.duration_s }),
            },
        );
    }

    if !door_near && episode.duration_s <= 45 && episode.event_rate_per_min >= 6.0 {
        s_p += 0.55;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "SHORT_HIGH_RATE_NO_DOOR".to_string(),
                direction: "pet".to_string(),
                weight: 0.55,
                evidence: json!({ "duration_s": episode.duration_s, "rate": episode.event_rate_per_min }),
            },
        );
    }

    if saw_presence_complete && episode.duration_s >= 20 {
        s_h += 0.08;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "COMPLETE_PRESENCE_EPISODE_DEFAULT".to_string(),
                direction: "human".to_string(),
                weight: 0.08,
                evidence: json!({ "duration_s": episode.duration_s }),
            },
        );
    }

    if episode.duration_s >= 120 {
        s_h += 0.25;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "LONG_PRESENCE_ON_OFF".to_string(),
                direction: "human".to_string(),
                weight: 0.25,
                evidence: json!({ "duration_s": episode.duration_s }),
            },
        );
    }

    if episode.event_count_presence_on >= 1
        && episode.event_count_motion == 0
        && episode.event_rate_per_min <= 1.0
        && episode.duration_s >= 60
    {
        s_h += 0.12;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "PRESENCE_ONLY_LOW_RATE".to_string(),
                direction: "human".to_string(),
                weight: 0.12,
                evidence: json!({ "rate": episode.event_rate_per_min }),
            },
        );
    }

    if episode.event_rate_per_min >= 12.0 && episode.duration_s <= 60 && !door_near {
        s_p += 0.25;
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "VERY_HIGH_RATE_BURST".to_string(),
                direction: "pet".to_string(),
                weight: 0.25,
                evidence: json!({ "rate": episode.event_rate_per_min }),
            },
        );
    }

    let total = s_h + s_p + s_u;
    let (mut p_h, mut p_p, mut p_u) = if total <= 0.0 {
        (0.0, 0.0, 1.0)
    } else {
        (s_h / total, s_p / total, s_u / total)
    };

    let best = [
        (EpisodeClass::Human, p_h),
        (EpisodeClass::Pet, p_p),
        (EpisodeClass::Unknown, p_u),
    ]
    .into_iter()
    .fold((EpisodeClass::Unknown, p_u), |acc, cand| if cand.1 > acc.1 { cand } else { acc });

    let class = if matches!(best.0, EpisodeClass::Human | EpisodeClass::Pet)
        && best.1 >= 0.55
        && best.1 - p_u >= 0.10
    {
        best.0
    } else {
        push(
            &mut reasons,
            &mut seen,
            ClassifierReason {
                code: "LOW_CONFIDENCE".to_string(),
                direction: "unknown".to_string(),
                weight: 0.20,
                evidence: json!({ "p_human": p_h, "p_pet": p_p, "p_unknown": p_u }),
            },
        );
        EpisodeClass::Unknown
    };

    // Clamp and renormalize.
    p_h = p_h.clamp(0.0, 1.0);
    p_p = p_p.clamp(0.0, 1.0);
    p_u = p_u.clamp(0.0, 1.0);
    let renorm = p_h + p_p + p_u;
    if renorm > 0.0 {
        p_h /= renorm;
        p_p /= renorm;
        p_u /= renorm;
    } else {
        p_u = 1.0;
    }

    let reason_summary = if reasons.is_empty() {
        "no_reasons".to_string()
    } else {
        reasons
            .iter()
            .take(3)
            .map(|r| r.code.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };

    episode.class = class;
    episode.p_human = p_h;
    episode.p_pet = p_p;
    episode.p_unknown = p_u;
    episode.reasons = reasons;
    episode.reason_summary = reason_summary;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCategory;
    use chrono::TimeZone;
    use chrono_tz::Europe::Oslo;
    use serde_json::json;

    fn ev(id: &str, ts: DateTime<Utc>, category: EventCategory, payload: Value) -> RawEvent {
        RawEvent { id: id.to_string(), timestamp: ts, category, payload }
    }

    #[test]
    fn presence_on_off_closes_with_off_event_and_high_quality() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let events = vec![
            ev("e1", t0, EventCategory::Presence, json!({"room": "kitchen", "state": "on"})),
            ev("e2", t0 + chrono::Duration::seconds(30), EventCategory::Presence, json!({"room": "kitchen", "state": "off"})),
        ];
        let episodes = build_episodes(&events, Oslo);
        assert_eq!(episodes.len(), 1);
        let ep = &episodes[0];
        assert_eq!(ep.close_reason, EpisodeCloseReason::OffEvent);
        assert_eq!(ep.quality, EpisodeQuality::High);
        assert_eq!(ep.duration_s, 30);
    }

    #[test]
    fn end_of_stream_force_closes_open_episode_via_timeout() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let events = vec![ev("e1", t0, EventCategory::Motion, json!({"room": "hallway"}))];
        let episodes = build_episodes(&events, Oslo);
        assert_eq!(episodes.len(), 1);
        let ep = &episodes[0];
        assert_eq!(ep.close_reason, EpisodeCloseReason::Timeout);
        assert_eq!(ep.quality, EpisodeQuality::Low);
        assert!(ep.quality_flags.contains(&"missing_off".to_string()));
        assert_eq!(ep.duration_s, DEFAULT_TIMEOUT_NO_PRESENCE_S);
    }

    #[test]
    fn very_short_presence_blip_without_door_classifies_as_pet() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let events = vec![
            ev("e1", t0, EventCategory::Presence, json!({"room": "kitchen", "state": "on"})),
            ev("e2", t0 + chrono::Duration::seconds(8), EventCategory::Presence, json!({"room": "kitchen", "state": "off"})),
        ];
        let episodes = build_episodes(&events, Oslo);
        let ep = &episodes[0];
        assert!(ep.reasons.iter().any(|r| r.code == "PRESENCE_BLIP_VERY_SHORT_NO_DOOR"));
        assert_eq!(ep.class, EpisodeClass::Pet);
        assert!((ep.p_human + ep.p_pet + ep.p_unknown - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn door_before_start_pushes_toward_human() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let events = vec![
            ev("d1", t0 - chrono::Duration::seconds(10), EventCategory::Door, json!({"room": "hallway", "state": "open"})),
            ev("e1", t0, EventCategory::Presence, json!({"room": "hallway", "state": "on"})),
            ev("e2", t0 + chrono::Duration::seconds(200), EventCategory::Presence, json!({"room": "hallway", "state": "off"})),
        ];
        let episodes = build_episodes(&events, Oslo);
        let ep = &episodes[0];
        assert_eq!(ep.door_before_s, Some(10));
        assert_eq!(ep.class, EpisodeClass::Human);
    }

    #[test]
    fn probability_law_holds_for_every_classification_path() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let events = vec![ev("e1", t0, EventCategory::Motion, json!({"room": "office"}))];
        let episodes = build_episodes(&events, Oslo);
        let ep = &episodes[0];
        assert!((ep.p_human + ep.p_pet + ep.p_unknown - 1.0).abs() <= 1e-6);
    }
}
