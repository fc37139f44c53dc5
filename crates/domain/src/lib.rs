//! Domain types and pure decision logic for the AgingOS analytics backend.

pub mod anomaly;
pub mod anomaly_episode;
pub mod baseline;
pub mod deviation;
pub mod episode;
pub mod errors;
pub mod event;
pub mod insights;
pub mod job_status;
pub mod monitor_mode;
pub mod occupancy;
pub mod proposal;
pub mod proposal_miner;
pub mod rules;
pub mod time;

use serde::Serialize;

pub use errors::*;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub build_sha: String,
    pub uptime_seconds: u64,
}

/// Ready check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub database: String,
}
