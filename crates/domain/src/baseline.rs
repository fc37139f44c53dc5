//! Baseline reader (C4): per-(room, bucket) activity/door statistics and
//! per-transition probabilities, computed offline and read here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::DomainError;

/// Per-(room, bucket, dow, weekend) activity and door statistics.
#[derive(Debug, Clone)]
pub struct BaselineRoomBucket {
    pub user_id: Uuid,
    pub model_end: DateTime<Utc>,
    pub dow: u32,
    pub is_weekend: bool,
    pub room_id: String,
    pub bucket_idx: i32,
    pub activity_median: f64,
    pub activity_sigma: f64,
    pub activity_support_n: i64,
    pub activity_support_days: i64,
    pub door_median: f64,
    pub door_sigma: f64,
    pub door_support_n: i64,
    pub door_support_days: i64,
    pub sigma_floor: f64,
}

/// Per-(from_room, to_room, bucket, dow, weekend) transition probability.
#[derive(Debug, Clone)]
pub struct BaselineTransition {
    pub user_id: Uuid,
    pub model_end: DateTime<Utc>,
    pub dow: u32,
    pub is_weekend: bool,
    pub bucket_idx: i32,
    pub from_room_id: String,
    pub to_room_id: String,
    pub p_smoothed: f64,
    pub support_n: i64,
}

/// Minimum support (observation count) a baseline row must have to be
/// considered trustworthy rather than "unsupported".
pub const MIN_SUPPORT_N: i64 = 1;

/// Contract over precomputed baseline statistics (C4). Returns `None`
/// ("unsupported") rather than zero or synthetic values when a row is
/// missing — callers must treat that distinctly from an observed zero.
#[async_trait::async_trait]
pub trait BaselineReader: Send + Sync {
    /// Latest `model_end` stamp for the configured instance user, if any
    /// baseline has been computed yet.
    async fn latest_model_end(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, DomainError>;

    async fn room_bucket(
        &self,
        user_id: Uuid,
        model_end: DateTime<Utc>,
        room_id: &str,
        bucket_idx: i32,
        dow: u32,
        is_weekend: bool,
    ) -> Result<Option<BaselineRoomBucket>, DomainError>;

    async fn transition(
        &self,
        user_id: Uuid,
        model_end: DateTime<Utc>,
        from_room_id: &str,
        to_room_id: &str,
        bucket_idx: i32,
        dow: u32,
        is_weekend: bool,
    ) -> Result<Option<BaselineTransition>, DomainError>;
}
