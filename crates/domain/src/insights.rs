//! Client-side interface to the auxiliary night/morning insights service.
//!
//! This service is an external collaborator, not part of the analytic core:
//! the trait and fail-soft payload exist so callers can be written and
//! tested against a stable shape without depending on any particular HTTP
//! client or transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// One finding returned by the insights service for a room/window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightFinding {
    pub room: String,
    pub summary: String,
    pub confidence: f64,
}

/// Response shape for a night/morning insights query. On upstream failure,
/// callers build this via [`InsightsPayload::fail_soft`] rather than
/// propagating the error to the HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsPayload {
    pub findings: Vec<InsightFinding>,
    pub proposals: Vec<String>,
    pub note: Option<String>,
}

impl InsightsPayload {
    /// Empty findings/proposals plus an explanatory note, used when the
    /// upstream service is unreachable or times out.
    pub fn fail_soft(note: impl Into<String>) -> Self {
        Self {
            findings: Vec::new(),
            proposals: Vec::new(),
            note: Some(note.into()),
        }
    }
}

/// A night/morning insights query over a room and window.
#[derive(Debug, Clone)]
pub struct InsightsQuery {
    pub room: Option<String>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Minimal interface to the auxiliary statistical service. Implementations
/// are expected to apply their own deadline and never block the caller
/// indefinitely; `Err` should be reserved for genuine upstream failure so
/// callers can fall back to [`InsightsPayload::fail_soft`].
#[async_trait]
pub trait InsightsClient: Send + Sync {
    async fn night_morning_insights(&self, query: InsightsQuery) -> Result<InsightsPayload, DomainError>;
}

/// Calls `client`, converting any failure into a fail-soft payload instead
/// of propagating the error, per the upstream-unreachable error policy.
pub async fn fetch_or_fail_soft(client: &dyn InsightsClient, query: InsightsQuery) -> InsightsPayload {
    match client.night_morning_insights(query).await {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "insights service call failed, returning fail-soft payload");
            InsightsPayload::fail_soft(format!("insights unavailable: {err}"))
        }
    }
}

/// Always-unavailable client, used when no insights base URL is configured.
#[derive(Debug, Default)]
pub struct NullInsightsClient;

#[async_trait]
impl InsightsClient for NullInsightsClient {
    async fn night_morning_insights(&self, _query: InsightsQuery) -> Result<InsightsPayload, DomainError> {
        Err(DomainError::Upstream("insights service not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingClient;

    #[async_trait]
    impl InsightsClient for FailingClient {
        async fn night_morning_insights(&self, _query: InsightsQuery) -> Result<InsightsPayload, DomainError> {
            Err(DomainError::Upstream("timed out".to_string()))
        }
    }

    struct OkClient;

    #[async_trait]
    impl InsightsClient for OkClient {
        async fn night_morning_insights(&self, _query: InsightsQuery) -> Result<InsightsPayload, DomainError> {
            Ok(InsightsPayload {
                findings: vec![InsightFinding {
                    room: "bedroom".to_string(),
                    summary: "quiet night".to_string(),
                    confidence: 0.9,
                }],
                proposals: Vec::new(),
                note: None,
            })
        }
    }

    fn query() -> InsightsQuery {
        InsightsQuery { room: None, since: Utc::now(), until: Utc::now() }
    }

    #[tokio::test]
    async fn fail_soft_on_upstream_error() {
        let payload = fetch_or_fail_soft(&FailingClient, query()).await;
        assert!(payload.findings.is_empty());
        assert!(payload.proposals.is_empty());
        assert!(payload.note.is_some());
    }

    #[tokio::test]
    async fn passes_through_successful_payload() {
        let payload = fetch_or_fail_soft(&OkClient, query()).await;
        assert_eq!(payload.findings.len(), 1);
        assert!(payload.note.is_none());
    }

    #[tokio::test]
    async fn null_client_is_always_upstream_error() {
        let result = NullInsightsClient.night_morning_insights(query()).await;
        assert!(matches!(result, Err(DomainError::Upstream(_))));
    }
}
