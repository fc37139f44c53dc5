//! Background jobs: four independently spawned tasks, each with its own
//! interval and `JobStatus` row. `max_instances=1` falls out naturally since
//! each job is a single loop rather than a shared queue of ad-hoc ticks.

pub mod anomaly_job;
pub mod proposal_jobs;
pub mod rule_engine;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::AppState;

/// Spawn all four jobs. The caller (normally `main`) holds the handles for
/// the lifetime of the process; dropping them would detach, not cancel.
pub fn spawn_all(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(rule_engine::run_loop(state.clone())),
        tokio::spawn(anomaly_job::run_loop(state.clone())),
        tokio::spawn(proposal_jobs::run_miner_loop(state.clone())),
        tokio::spawn(proposal_jobs::run_expiry_loop(state)),
    ]
}
