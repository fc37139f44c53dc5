//! AgingOS analytics backend server binary.

use std::sync::Arc;
use std::time::Instant;

use agingos_api::clients::insights::HttpInsightsClient;
use agingos_api::{AppState, build_router, scheduler};
use agingos_config::{AppConfig, LogFormat, RuleConfig};
use agingos_domain::insights::{InsightsClient, NullInsightsClient};
use agingos_storage::{
    AnomalyEpisodeRepository, BaselineRepository, DeviationRepository, EventRepository,
    JobStatusRepository, MonitorModeRepository, ProposalRepository, create_pool, run_migrations,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let rule_config = RuleConfig::from_env()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sqlx=warn".into());
    match config.log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Starting AgingOS analytics backend...");

    tracing::info!("Binding to {}", config.bind_address);
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection pool created");

    run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let insights: Arc<dyn InsightsClient> = match &config.insights_base_url {
        Some(base_url) => Arc::new(HttpInsightsClient::new(
            base_url.clone(),
            std::time::Duration::from_millis(config.insights_timeout_ms),
        )),
        None => Arc::new(NullInsightsClient),
    };

    let state = Arc::new(AppState {
        pool: pool.clone(),
        events: EventRepository::new(pool.clone()),
        deviations: DeviationRepository::new(pool.clone()),
        anomaly_episodes: AnomalyEpisodeRepository::new(pool.clone()),
        baselines: BaselineRepository::new(pool.clone()),
        proposals: ProposalRepository::new(pool.clone()),
        monitor_modes: MonitorModeRepository::new(pool.clone()),
        job_status: JobStatusRepository::new(pool),
        config: config.clone(),
        rule_config,
        insights,
        start_time: Instant::now(),
    });

    let _job_handles = if config.scheduler_enabled {
        tracing::info!("Scheduler enabled, spawning background jobs");
        scheduler::spawn_all(state.clone())
    } else {
        tracing::info!("Scheduler disabled via SCHEDULER_ENABLED=false");
        Vec::new()
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Server listening on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
