//! Time and window utilities (C1): strict UTC policy, 15-minute bucket
//! alignment, and local-time night/morning windows.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::errors::DomainError;

/// Width of an anomaly-scoring bucket.
pub const BUCKET_MINUTES: i64 = 15;

/// Parse an RFC3339 timestamp, rejecting anything without an explicit offset.
///
/// `chrono::DateTime<Utc>` is always UTC-aware once constructed, so the
/// "non-aware" failure mode described for this system lives at the wire
/// boundary: a bare `1997-07-16T19:20:30` (no offset) is rejected here the
/// same way the original system rejects a naive `datetime`.
pub fn parse_utc_aware(raw: &str, field_name: &str) -> Result<DateTime<Utc>, DomainError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| DomainError::BadTime(format!("{field_name}: {e}")))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Require that a timestamp has an explicit offset; always true for
/// `DateTime<Utc>`, kept so call sites can read like the original policy
/// check rather than a no-op.
pub fn require_utc_aware(dt: DateTime<Utc>, _field_name: &str) -> Result<DateTime<Utc>, DomainError> {
    Ok(dt)
}

/// Truncate a UTC instant down to whole seconds (drop sub-second precision).
pub fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.timestamp(), 0).single().unwrap_or(dt)
}

/// Align `dt` down to the nearest `BUCKET_MINUTES` boundary in `tz` local
/// time, returning the UTC instant of that boundary.
pub fn bucket_align(dt: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = dt.with_timezone(&tz);
    let floored_minute = (local.minute() as i64 / BUCKET_MINUTES) * BUCKET_MINUTES;
    let aligned_local = tz
        .with_ymd_and_hms(
            local.year(),
            local.month(),
            local.day(),
            local.hour(),
            floored_minute as u32,
            0,
        )
        .single()
        .unwrap_or(local);
    aligned_local.with_timezone(&Utc)
}

/// The most recently *finished* 15-minute bucket as of `now`, i.e.
/// `floor(now_local, 15m) - 15m`, returned as its UTC start instant.
pub fn last_finished_bucket_start(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    bucket_align(now, tz) - Duration::minutes(BUCKET_MINUTES)
}

/// `bucket_idx` in `[0, 96)`: the index of the 15-minute bucket within its
/// local day, matching the original `(hour*60+minute)//15` computation.
pub fn bucket_idx_15m(dt: DateTime<Utc>, tz: Tz) -> i32 {
    let local = dt.with_timezone(&tz);
    ((local.hour() as i64 * 60 + local.minute() as i64) / BUCKET_MINUTES) as i32
}

/// ISO weekday, 1=Monday..7=Sunday, in local time. Used by `Episode::weekday`.
pub fn iso_weekday(dt: DateTime<Utc>, tz: Tz) -> u32 {
    dt.with_timezone(&tz).weekday().number_from_monday()
}

/// Python-`weekday()`-style day-of-week, 0=Monday..6=Sunday, in local time.
/// Used as the `dow` component of baseline bucket keys.
pub fn dow(dt: DateTime<Utc>, tz: Tz) -> u32 {
    iso_weekday(dt, tz) - 1
}

/// Whether `dow` falls on a weekend (Saturday=5, Sunday=6 in 0-indexed form).
pub fn is_weekend(dow: u32) -> bool {
    dow >= 5
}

/// Returns the UTC `[start, end)` of the configured night window containing
/// or following `reference`'s local day, crossing midnight as needed.
/// Default window is local `22:00` (previous day) through local `07:00`.
pub fn night_window_utc(
    reference: DateTime<Utc>,
    tz: Tz,
    start_local: NaiveTime,
    end_local: NaiveTime,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = reference.with_timezone(&tz).date_naive();
    let start_local_dt = tz
        .from_local_datetime(&(local_date.pred_opt().unwrap_or(local_date)).and_time(start_local))
        .single()
        .unwrap();
    let end_local_dt = tz
        .from_local_datetime(&local_date.and_time(end_local))
        .single()
        .unwrap();
    (start_local_dt.with_timezone(&Utc), end_local_dt.with_timezone(&Utc))
}

/// True if `dt`'s local time-of-day falls inside the night window
/// `t >= start_local OR t < end_local` (the window crosses midnight).
pub fn is_night_local(dt: DateTime<Utc>, tz: Tz, start_local: NaiveTime, end_local: NaiveTime) -> bool {
    let t = dt.with_timezone(&tz).time();
    t >= start_local || t < end_local
}

/// Morning window membership: local `[start_local, end_local)`, no midnight
/// crossing.
pub fn is_morning_local(dt: DateTime<Utc>, tz: Tz, start_local: NaiveTime, end_local: NaiveTime) -> bool {
    let t = dt.with_timezone(&tz).time();
    t >= start_local && t < end_local
}

/// Time-of-day bucket label used on episode rows: `night` (<07), `morning`
/// (<12), `day` (<18), else `evening`. Computed in UTC, matching the
/// original `tod_bucket_utc` helper.
pub fn tod_bucket_utc(dt: DateTime<Utc>) -> &'static str {
    let hour = dt.hour();
    if hour < 7 {
        "night"
    } else if hour < 12 {
        "morning"
    } else if hour < 18 {
        "day"
    } else {
        "evening"
    }
}

/// "Night-date" assignment used by proposal mining: hours before 06:00 local
/// belong to the previous calendar date.
pub fn night_date(dt: DateTime<Utc>, tz: Tz) -> chrono::NaiveDate {
    let local = dt.with_timezone(&tz);
    if local.hour() < 6 {
        local.date_naive().pred_opt().unwrap_or_else(|| local.date_naive())
    } else {
        local.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Oslo;

    #[test]
    fn bucket_align_floors_to_15_minutes() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 1, 10, 37, 12).unwrap();
        let aligned = bucket_align(dt, Oslo);
        // Oslo is UTC+1 in January; local 11:37 floors to 11:30 -> 10:30 UTC.
        assert_eq!(aligned, Utc.with_ymd_and_hms(2025, 1, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn last_finished_bucket_is_one_bucket_before_aligned_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 44, 0).unwrap();
        let last = last_finished_bucket_start(now, Oslo);
        assert_eq!(last, Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn bucket_idx_covers_full_day() {
        let midnight = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(bucket_idx_15m(midnight, Oslo), 92); // Oslo summer = UTC+2 -> local 02:00
    }

    #[test]
    fn iso_weekday_and_dow_are_offset_by_one() {
        let monday = Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap();
        assert_eq!(iso_weekday(monday, Oslo), 1);
        assert_eq!(dow(monday, Oslo), 0);
        assert!(!is_weekend(dow(monday, Oslo)));
    }

    #[test]
    fn night_window_crosses_midnight() {
        let dt_in_window = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap(); // 02:00 Oslo
        let start = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert!(is_night_local(dt_in_window, Oslo, start, end));

        let dt_outside = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(); // 11:00 Oslo
        assert!(!is_night_local(dt_outside, Oslo, start, end));
    }

    #[test]
    fn tod_bucket_matches_utc_hour_ranges() {
        assert_eq!(tod_bucket_utc(Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap()), "night");
        assert_eq!(tod_bucket_utc(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()), "morning");
        assert_eq!(tod_bucket_utc(Utc.with_ymd_and_hms(2025, 1, 1, 15, 0, 0).unwrap()), "day");
        assert_eq!(tod_bucket_utc(Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap()), "evening");
    }

    #[test]
    fn night_date_assigns_early_hours_to_previous_day() {
        let early = Utc.with_ymd_and_hms(2025, 1, 2, 4, 0, 0).unwrap(); // 05:00 Oslo
        assert_eq!(night_date(early, Oslo), chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());

        let late = Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap(); // 22:00 Oslo
        assert_eq!(night_date(late, Oslo), chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }
}
