//! Storage layer for the AgingOS backend: Postgres-backed repositories
//! implementing the domain crate's reader traits and persisting each
//! stateful lifecycle (deviations, anomaly episodes, proposals) under
//! row-locked transactions around the domain crate's pure decision
//! functions.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod anomaly_episode_repository;
pub mod baseline_repository;
pub mod deviation_repository;
pub mod error;
pub mod event_repository;
pub mod job_status_repository;
pub mod monitor_mode_repository;
pub mod proposal_repository;

pub use anomaly_episode_repository::AnomalyEpisodeRepository;
pub use baseline_repository::BaselineRepository;
pub use deviation_repository::DeviationRepository;
pub use error::StorageError;
pub use event_repository::EventRepository;
pub use job_status_repository::JobStatusRepository;
pub use monitor_mode_repository::MonitorModeRepository;
pub use proposal_repository::ProposalRepository;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(StorageError::Connection)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(StorageError::Migration)
}

/// Check database connectivity.
pub async fn check_connection(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(StorageError::Query)?;
    Ok(())
}
