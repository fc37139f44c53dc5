//! Proposal miner (C9): pure functions deriving `MinedProposal`s from a
//! window of anomaly episodes. Fetching those episodes is the scheduler
//! job's job (storage I/O); everything here is deterministic given the
//! episode slice and the clock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde_json::json;

use crate::anomaly::AnomalyLevel;
use crate::anomaly_episode::AnomalyEpisodeState;
use crate::proposal::{room_dedupe_key, MinedProposal, ProposalReason, ProposalType};
use crate::time::{is_night_local, night_date};

const NIGHT_START: NaiveTime = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
const NIGHT_END: NaiveTime = NaiveTime::from_hms_opt(7, 0, 0).unwrap();

fn in_window(ts: DateTime<Utc>, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    ts >= since && ts < until
}

/// **NIGHT_ACTIVITY_EARLY_SIGNAL_1_OF_7**: any episode in the last 7 days
/// starting inside the local night window `[22, 24) ∪ [0, 7)`.
pub fn mine_night_activity_early_signal(
    episodes: &[AnomalyEpisodeState],
    tz: Tz,
    now: DateTime<Utc>,
) -> Option<MinedProposal> {
    let since = now - chrono::Duration::days(7);
    let hit = episodes
        .iter()
        .find(|e| in_window(e.start_ts, since, now) && is_night_local(e.start_ts, tz, NIGHT_START, NIGHT_END))?;

    let why = vec![ProposalReason {
        code: "NIGHT_ACTIVITY_EARLY_SIGNAL".to_string(),
        text: "Anomali oppdaget om natten de siste 7 dagene.".to_string(),
        detail: json!({ "room": hit.room, "start_ts": hit.start_ts }),
    }];
    let evidence = json!({ "window_days": 7, "sample_episode_room": hit.room, "sample_start_ts": hit.start_ts });

    Some(MinedProposal::new(
        ProposalType::NightActivityEarlySignal1Of7,
        "night_activity:all",
        evidence,
        why,
        since,
        now,
    ))
}

/// **DOOR_ANOMALY_BURST_3_OF_14**: >= 3 episodes in 14 days whose peak or
/// last reasons include a code starting with `EVENT_DOOR`.
pub fn mine_door_anomaly_burst(
    episodes: &[AnomalyEpisodeState],
    now: DateTime<Utc>,
) -> Option<MinedProposal> {
    let since = now - chrono::Duration::days(14);
    let matches: Vec<&AnomalyEpisodeState> = episodes
        .iter()
        .filter(|e| in_window(e.start_ts, since, now))
        .filter(|e| {
            e.reasons_peak
                .iter()
                .chain(e.reasons_last.iter())
                .any(|r| r.code.starts_with("EVENT_DOOR"))
        })
        .collect();

    if matches.len() < 3 {
        return None;
    }

    let why = vec![ProposalReason {
        code: "DOOR_ANOMALY_BURST".to_string(),
        text: format!("{} episoder med d\u{00f8}r-avvik de siste 14 dagene.", matches.len()),
        detail: json!({ "count": matches.len() }),
    }];
    let evidence = json!({
        "window_days": 14,
        "count": matches.len(),
        "sample_ids": matches.iter().take(5).map(|e| e.room.clone()).collect::<Vec<_>>(),
    });

    Some(MinedProposal::new(
        ProposalType::DoorAnomalyBurst3Of14,
        "door_usage:all",
        evidence,
        why,
        since,
        now,
    ))
}

/// **MVP_BOOTSTRAP_ANY_L2_1_OF_7**: any episode at level YELLOW or RED in
/// the last 7 days.
pub fn mine_mvp_bootstrap(episodes: &[AnomalyEpisodeState], now: DateTime<Utc>) -> Option<MinedProposal> {
    let since = now - chrono::Duration::days(7);
    let hit = episodes
        .iter()
        .find(|e| in_window(e.start_ts, since, now) && matches!(e.level, AnomalyLevel::Yellow | AnomalyLevel::Red))?;

    let why = vec![ProposalReason {
        code: "MVP_BOOTSTRAP".to_string(),
        text: "Minst \u{00e9}n niv\u{00e5}-2-anomali de siste 7 dagene.".to_string(),
        detail: json!({ "room": hit.room, "level": hit.level }),
    }];
    let evidence = json!({ "window_days": 7, "sample_room": hit.room });

    Some(MinedProposal::new(
        ProposalType::MvpBootstrapAnyL21Of7,
        "mvp_bootstrap:any_l2",
        evidence,
        why,
        since,
        now,
    ))
}

/// **NIGHT_ACTIVITY_FREQUENT_4_OF_7**: per room, >= 4 distinct night-dates in
/// the last 7 days with a level->=YELLOW episode starting in local `[22, 06)`.
pub fn mine_night_activity_frequent(
    episodes: &[AnomalyEpisodeState],
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<MinedProposal> {
    let since = now - chrono::Duration::days(7);
    let night_end_06 = NaiveTime::from_hms_opt(6, 0, 0).unwrap();

    let mut nights_by_room: BTreeMap<String, BTreeSet<chrono::NaiveDate>> = BTreeMap::new();
    for e in episodes {
        if !in_window(e.start_ts, since, now) {
            continue;
        }
        if !matches!(e.level, AnomalyLevel::Yellow | AnomalyLevel::Red) {
            continue;
        }
        if !is_night_local(e.start_ts, tz, NIGHT_START, night_end_06) {
            continue;
        }
        nights_by_room
            .entry(e.room.clone())
            .or_default()
            .insert(night_date(e.start_ts, tz));
    }

    nights_by_room
        .into_iter()
        .filter(|(_, nights)| nights.len() >= 4)
        .map(|(room, nights)| {
            let why = vec![ProposalReason {
                code: "NIGHT_ACTIVITY_FREQUENT".to_string(),
                text: format!("{} n\u{00e6}tter med aktivitet i {} de siste 7 dagene.", nights.len(), room),
                detail: json!({ "room": room, "night_count": nights.len() }),
            }];
            let evidence = json!({
                "window_days": 7,
                "room": room,
                "night_count": nights.len(),
                "nights": nights.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            });
            MinedProposal::new(
                ProposalType::NightActivityFrequent4Of7,
                room_dedupe_key(&room),
                evidence,
                why,
                since,
                now,
            )
            .with_room(room)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Oslo;
    use serde_json::json as j;

    fn episode(room: &str, start_ts: DateTime<Utc>, level: AnomalyLevel) -> AnomalyEpisodeState {
        AnomalyEpisodeState {
            room: room.to_string(),
            start_ts,
            end_ts: Some(start_ts + chrono::Duration::minutes(15)),
            level,
            score_total: 2.5,
            score_intensity: 2.5,
            score_sequence: 0.0,
            score_event: 0.0,
            peak_bucket: start_ts,
            peak_score: 2.5,
            reasons_peak: vec![],
            reasons_last: vec![],
            start_bucket: start_ts,
            last_bucket: start_ts,
            bucket_count: 1,
            green_streak: 0,
            closed_reason: None,
        }
    }

    #[test]
    fn night_activity_early_signal_fires_on_single_night_episode() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let night_ts = Utc.with_ymd_and_hms(2025, 1, 8, 23, 0, 0).unwrap();
        let episodes = vec![episode("kitchen", night_ts, AnomalyLevel::Yellow)];
        let proposal = mine_night_activity_early_signal(&episodes, Oslo, now);
        assert!(proposal.is_some());
        assert_eq!(proposal.unwrap().dedupe_key, "night_activity:all");
    }

    #[test]
    fn night_activity_early_signal_ignores_daytime_episodes() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let day_ts = Utc.with_ymd_and_hms(2025, 1, 9, 12, 0, 0).unwrap();
        let episodes = vec![episode("kitchen", day_ts, AnomalyLevel::Yellow)];
        assert!(mine_night_activity_early_signal(&episodes, Oslo, now).is_none());
    }

    #[test]
    fn door_anomaly_burst_requires_at_least_three() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let mut e1 = episode("hallway", now - chrono::Duration::days(1), AnomalyLevel::Yellow);
        e1.reasons_peak = vec![crate::anomaly::ScoreReason { code: "EVENT_DOOR_Z".to_string(), detail: j!({}) }];
        let mut e2 = e1.clone();
        e2.start_ts = now - chrono::Duration::days(3);
        let episodes_two = vec![e1.clone(), e2.clone()];
        assert!(mine_door_anomaly_burst(&episodes_two, now).is_none());

        let mut e3 = e1.clone();
        e3.start_ts = now - chrono::Duration::days(5);
        let episodes_three = vec![e1, e2, e3];
        assert!(mine_door_anomaly_burst(&episodes_three, now).is_some());
    }

    #[test]
    fn mvp_bootstrap_fires_on_any_l2_episode() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let episodes = vec![episode("kitchen", now - chrono::Duration::days(2), AnomalyLevel::Red)];
        assert!(mine_mvp_bootstrap(&episodes, now).is_some());

        let green_only = vec![episode("kitchen", now - chrono::Duration::days(2), AnomalyLevel::Green)];
        assert!(mine_mvp_bootstrap(&green_only, now).is_none());
    }

    #[test]
    fn night_activity_frequent_requires_four_distinct_nights_per_room() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let nights = [1, 2, 3, 4];
        let episodes: Vec<_> = nights
            .iter()
            .map(|d| episode("bedroom", Utc.with_ymd_and_hms(2025, 1, *d, 23, 0, 0).unwrap(), AnomalyLevel::Yellow))
            .collect();
        let proposals = mine_night_activity_frequent(&episodes, Oslo, now);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].room_id.as_deref(), Some("bedroom"));

        let only_three: Vec<_> = episodes[..3].to_vec();
        assert!(mine_night_activity_frequent(&only_three, Oslo, now).is_empty());
    }
}
