//! Anomaly scorer (C7): a deterministic, explainable 3-component score per
//! (room, 15-minute bucket).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::baseline::{BaselineRoomBucket, BaselineTransition};
use crate::episode::Episode;
use crate::time::{BUCKET_MINUTES, bucket_idx_15m, dow, is_weekend};

/// Traffic-light anomaly level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnomalyLevel {
    Green,
    Yellow,
    Red,
}

/// An explainable scoring reason: a code plus whatever numeric/context
/// detail produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReason {
    pub code: String,
    pub detail: Value,
}

/// The full, explainable score for one (room, bucket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketScore {
    pub room: String,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub dow: u32,
    pub is_weekend: bool,
    pub bucket_idx: i32,
    pub score_total: f64,
    pub score_intensity: f64,
    pub score_sequence: f64,
    pub score_event: f64,
    pub level: AnomalyLevel,
    pub reasons: Vec<ScoreReason>,
    pub details: Value,
}

/// Weights applied to non-human occupants' contribution to observed
/// activity (defaults per spec).
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub pet_weight: f64,
    pub unknown_weight: f64,
    pub p_floor: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            pet_weight: 0.25,
            unknown_weight: 0.50,
            p_floor: 1e-6,
        }
    }
}

fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

fn level_from_score(score: f64) -> AnomalyLevel {
    if score >= 4.0 {
        AnomalyLevel::Red
    } else if score >= 2.0 {
        AnomalyLevel::Yellow
    } else {
        AnomalyLevel::Green
    }
}

/// Sum, over episodes intersecting `[bucket_start, bucket_end)`, of
/// `event_rate_per_min * overlap_minutes * (p_human + pet_weight*p_pet +
/// unknown_weight*p_unknown)`.
pub fn observed_activity(
    episodes: &[Episode],
    bucket_start: DateTime<Utc>,
    bucket_end: DateTime<Utc>,
    weights: ScoringWeights,
) -> f64 {
    episodes
        .iter()
        .filter(|e| e.start_ts < bucket_end && e.end_ts > bucket_start)
        .map(|e| {
            let overlap_start = e.start_ts.max(bucket_start);
            let overlap_end = e.end_ts.min(bucket_end);
            let overlap_minutes = (overlap_end - overlap_start).num_seconds().max(0) as f64 / 60.0;
            let weighted_presence =
                e.p_human + weights.pet_weight * e.p_pet + weights.unknown_weight * e.p_unknown;
            e.event_rate_per_min * overlap_minutes * weighted_presence
        })
        .sum()
}

/// The room of the most recent episode ending at or before `bucket_start`.
pub fn prev_room<'a>(episodes: &'a [Episode], bucket_start: DateTime<Utc>) -> Option<&'a str> {
    episodes
        .iter()
        .filter(|e| e.end_ts <= bucket_start)
        .max_by_key(|e| e.end_ts)
        .map(|e| e.room.as_str())
}

/// Inputs required to score one (room, bucket) pair. Everything here is
/// pre-fetched by the caller (scheduler job or test) so this function stays
/// pure and synchronous.
pub struct ScoreInput<'a> {
    pub room: &'a str,
    pub bucket_start: DateTime<Utc>,
    pub observed_activity: f64,
    pub observed_door_events: i64,
    pub prev_room: Option<&'a str>,
    pub room_bucket: Option<&'a BaselineRoomBucket>,
    pub transition: Option<&'a BaselineTransition>,
    pub weights: ScoringWeights,
    pub tz: Tz,
}

/// Top-level escape hatch: if the instance user has no baseline model at
/// all yet, every bucket scores GREEN with a single explanatory reason.
pub fn score_missing_baseline_status(room: &str, bucket_start: DateTime<Utc>, tz: Tz) -> BucketScore {
    let bucket_end = bucket_start + chrono::Duration::minutes(BUCKET_MINUTES);
    BucketScore {
        room: room.to_string(),
        bucket_start,
        bucket_end,
        dow: dow(bucket_start, tz),
        is_weekend: is_weekend(dow(bucket_start, tz)),
        bucket_idx: bucket_idx_15m(bucket_start, tz),
        score_total: 0.0,
        score_intensity: 0.0,
        score_sequence: 0.0,
        score_event: 0.0,
        level: AnomalyLevel::Green,
        reasons: vec![ScoreReason {
            code: "BASELINE_STATUS_MISSING".to_string(),
            detail: json!({}),
        }],
        details: json!({}),
    }
}

/// Score one (room, bucket). See module docs and `SPEC_FULL.md` section 4.7
/// for the exact arithmetic.
pub fn score_room_bucket(input: ScoreInput<'_>) -> BucketScore {
    let bucket_end = input.bucket_start + chrono::Duration::minutes(BUCKET_MINUTES);
    let dow_val = dow(input.bucket_start, input.tz);
    let is_weekend_val = is_weekend(dow_val);
    let bucket_idx = bucket_idx_15m(input.bucket_start, input.tz);

    let mut reasons = Vec::new();
    let mut score_intensity = 0.0;
    let mut score_event = 0.0;
    let mut score_sequence = 0.0;

    match input.room_bucket {
        None => {
            reasons.push(ScoreReason {
                code: "BASELINE_MISSING_ROOM_BUCKET".to_string(),
                detail: json!({ "room": input.room, "bucket_idx": bucket_idx }),
            });
        }
        Some(baseline) => {
            let sigma_eff_activity = baseline.activity_sigma.max(baseline.sigma_floor);
            if baseline.activity_support_n > 0 {
                let z = (input.observed_activity - baseline.activity_median) / sigma_eff_activity;
                let z_pos = z.max(0.0);
                score_intensity = clamp((z_pos - 2.0) / 1.0, 0.0, 3.0);
                if score_intensity > 0.0 {
                    reasons.push(ScoreReason {
                        code: "INTENSITY_ACTIVITY_Z".to_string(),
                        detail: json!({ "z": z, "observed": input.observed_activity, "median": baseline.activity_median }),
                    });
                }
            } else {
                reasons.push(ScoreReason {
                    code: "BASELINE_ACTIVITY_UNSUPPORTED".to_string(),
                    detail: json!({}),
                });
            }

            let sigma_eff_door = baseline.door_sigma.max(baseline.sigma_floor);
            if baseline.door_support_n > 0 {
                let dz = (input.observed_door_events as f64 - baseline.door_median) / sigma_eff_door;
                let dz_pos = dz.max(0.0);
                score_event = clamp((dz_pos - 1.0) / 1.0, 0.0, 3.0);
                if score_event > 0.0 {
                    reasons.push(ScoreReason {
                        code: "EVENT_DOOR_Z".to_string(),
                        detail: json!({ "z": dz, "observed": input.observed_door_events, "median": baseline.door_median }),
                    });
                }
            } else {
                reasons.push(ScoreReason {
                    code: "BASELINE_DOOR_UNSUPPORTED".to_string(),
                    detail: json!({}),
                });
            }
        }
    }

    if input.prev_room.map(|r| r != input.room).unwrap_or(false) {
        match input.transition {
            None => {
                reasons.push(ScoreReason {
                    code: "TRANSITION_BASELINE_MISSING".to_string(),
                    detail: json!({ "from": input.prev_room, "to": input.room }),
                });
            }
            Some(transition) => {
                let rarity = -(transition.p_smoothed.max(input.weights.p_floor).ln());
                score_sequence = clamp((rarity - 2.0) / 2.0, 0.0, 3.0);
                if score_sequence > 0.0 {
                    reasons.push(ScoreReason {
                        code: "SEQUENCE_TRANSITION_RARITY".to_string(),
                        detail: json!({ "rarity": rarity, "p_smoothed": transition.p_smoothed }),
                    });
                }
            }
        }
    }

    let score_total = score_intensity + score_event + score_sequence;

    BucketScore {
        room: input.room.to_string(),
        bucket_start: input.bucket_start,
        bucket_end,
        dow: dow_val,
        is_weekend: is_weekend_val,
        bucket_idx,
        score_total,
        score_intensity,
        score_sequence,
        score_event,
        level: level_from_score(score_total),
        reasons,
        details: json!({
            "observed_activity": input.observed_activity,
            "observed_door_events": input.observed_door_events,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Oslo;
    use uuid::Uuid;

    fn baseline(activity_median: f64, activity_sigma: f64, door_median: f64, door_sigma: f64) -> BaselineRoomBucket {
        BaselineRoomBucket {
            user_id: Uuid::nil(),
            model_end: Utc::now(),
            dow: 0,
            is_weekend: false,
            room_id: "kitchen".to_string(),
            bucket_idx: 40,
            activity_median,
            activity_sigma,
            activity_support_n: 30,
            activity_support_days: 30,
            door_median,
            door_sigma,
            door_support_n: 30,
            door_support_days: 30,
            sigma_floor: 0.1,
        }
    }

    #[test]
    fn level_thresholds_match_spec() {
        assert_eq!(level_from_score(0.0), AnomalyLevel::Green);
        assert_eq!(level_from_score(1.99), AnomalyLevel::Green);
        assert_eq!(level_from_score(2.0), AnomalyLevel::Yellow);
        assert_eq!(level_from_score(3.99), AnomalyLevel::Yellow);
        assert_eq!(level_from_score(4.0), AnomalyLevel::Red);
    }

    #[test]
    fn missing_baseline_row_yields_zero_with_reason() {
        let bucket_start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let score = score_room_bucket(ScoreInput {
            room: "kitchen",
            bucket_start,
            observed_activity: 5.0,
            observed_door_events: 0,
            prev_room: None,
            room_bucket: None,
            transition: None,
            weights: ScoringWeights::default(),
            tz: Oslo,
        });
        assert_eq!(score.score_total, 0.0);
        assert_eq!(score.level, AnomalyLevel::Green);
        assert!(score.reasons.iter().any(|r| r.code == "BASELINE_MISSING_ROOM_BUCKET"));
    }

    #[test]
    fn high_activity_z_drives_intensity_score() {
        let bucket_start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let b = baseline(1.0, 1.0, 0.0, 0.1);
        let score = score_room_bucket(ScoreInput {
            room: "kitchen",
            bucket_start,
            observed_activity: 4.0, // z = 3 -> clamp((3-2)/1,0,3) = 1
            observed_door_events: 0,
            prev_room: None,
            room_bucket: Some(&b),
            transition: None,
            weights: ScoringWeights::default(),
            tz: Oslo,
        });
        assert!((score.score_intensity - 1.0).abs() < 1e-9);
        assert!(score.reasons.iter().any(|r| r.code == "INTENSITY_ACTIVITY_Z"));
    }

    #[test]
    fn rare_transition_scores_sequence_component() {
        let bucket_start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let transition = BaselineTransition {
            user_id: Uuid::nil(),
            model_end: Utc::now(),
            dow: 0,
            is_weekend: false,
            bucket_idx: 40,
            from_room_id: "bedroom".to_string(),
            to_room_id: "kitchen".to_string(),
            p_smoothed: 0.001, // rarity = -ln(0.001) ~ 6.9 -> clamp((6.9-2)/2,0,3)=3
            support_n: 10,
        };
        let score = score_room_bucket(ScoreInput {
            room: "kitchen",
            bucket_start,
            observed_activity: 0.0,
            observed_door_events: 0,
            prev_room: Some("bedroom"),
            room_bucket: None,
            transition: Some(&transition),
            weights: ScoringWeights::default(),
            tz: Oslo,
        });
        assert!((score.score_sequence - 3.0).abs() < 1e-9);
        assert!(score.reasons.iter().any(|r| r.code == "SEQUENCE_TRANSITION_RARITY"));
    }
}
