//! `reqwest`-backed implementation of `InsightsClient`, calling the
//! auxiliary night/morning insights service with a bounded deadline.

use std::time::Duration;

use agingos_domain::errors::DomainError;
use agingos_domain::insights::{InsightsClient, InsightsPayload, InsightsQuery};
use async_trait::async_trait;
use serde::Deserialize;

pub struct HttpInsightsClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInsightsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    findings: Vec<agingos_domain::insights::InsightFinding>,
    #[serde(default)]
    proposals: Vec<String>,
}

#[async_trait]
impl InsightsClient for HttpInsightsClient {
    async fn night_morning_insights(&self, query: InsightsQuery) -> Result<InsightsPayload, DomainError> {
        let url = format!("{}/insights/night-morning", self.base_url.trim_end_matches('/'));

        let request = self
            .http
            .get(&url)
            .query(&[("since", query.since.to_rfc3339()), ("until", query.until.to_rfc3339())]);
        let request = match &query.room {
            Some(room) => request.query(&[("room", room.as_str())]),
            None => request,
        };

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| DomainError::Upstream(format!("insights request to {url} timed out")))?
            .map_err(|err| DomainError::Upstream(err.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::Upstream(format!(
                "insights service returned status {}",
                response.status()
            )));
        }

        let body: InsightsResponse = response
            .json()
            .await
            .map_err(|err| DomainError::Upstream(format!("invalid insights response: {err}")))?;

        Ok(InsightsPayload {
            findings: body.findings,
            proposals: body.proposals,
            note: None,
        })
    }
}
