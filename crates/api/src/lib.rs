//! AgingOS analytics backend server library.

pub mod clients;
pub mod handlers;
pub mod middleware;
pub mod scheduler;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use agingos_config::{AppConfig, RuleConfig};
use agingos_domain::insights::InsightsClient;
use agingos_domain::{HealthResponse, ReadyResponse};
use agingos_storage::{
    AnomalyEpisodeRepository, BaselineRepository, DeviationRepository, EventRepository,
    JobStatusRepository, MonitorModeRepository, ProposalRepository, check_connection,
};
use sqlx::PgPool;

/// Application state shared across handlers and scheduler jobs.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub events: EventRepository,
    pub deviations: DeviationRepository,
    pub anomaly_episodes: AnomalyEpisodeRepository,
    pub baselines: BaselineRepository,
    pub proposals: ProposalRepository,
    pub monitor_modes: MonitorModeRepository,
    pub job_status: JobStatusRepository,
    pub config: AppConfig,
    pub rule_config: RuleConfig,
    pub insights: Arc<dyn InsightsClient>,
    pub start_time: Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/event", post(handlers::events::ingest_event))
        .route("/events", get(handlers::events::list_events))
        .route("/deviations", get(handlers::deviations::list_deviations))
        .route(
            "/deviations/{id}",
            patch(handlers::deviations::set_deviation_status),
        )
        .route(
            "/deviations/evaluate",
            get(handlers::deviations::evaluate_deviations),
        )
        .route("/proposals", get(handlers::proposals::list_proposals))
        .route(
            "/proposals/{id}/test",
            post(handlers::proposals::test_proposal),
        )
        .route(
            "/proposals/{id}/activate",
            post(handlers::proposals::activate_proposal),
        )
        .route(
            "/proposals/{id}/reject",
            post(handlers::proposals::reject_proposal),
        )
        .route("/anomalies", get(handlers::anomalies::list_anomalies))
        .layer(axum::middleware::from_extractor_with_state::<
            middleware::auth::ApiKey,
            Arc<AppState>,
        >(state.clone()));

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_sha: option_env!("BUILD_SHA").unwrap_or("dev").to_string(),
        uptime_seconds: uptime,
    })
}

/// Readiness check endpoint.
async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let db_status = match check_connection(&state.pool).await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    Json(ReadyResponse {
        status: if db_status == "connected" {
            "ok"
        } else {
            "degraded"
        }
        .to_string(),
        database: db_status.to_string(),
    })
}
