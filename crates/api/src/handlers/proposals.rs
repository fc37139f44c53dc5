//! Proposal read and transition endpoints (C10).

use std::sync::Arc;

use agingos_domain::DomainError;
use agingos_domain::proposal::{ActionSource, ProposalAction, ProposalRecord, ProposalTransition};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;

const DEFAULT_PROPOSALS_LIMIT: i64 = 100;
const RECENT_ACTIONS_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct ListProposalsQuery {
    pub last: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ProposalWithActions {
    #[serde(flatten)]
    pub proposal: ProposalRecord,
    pub actions: Vec<ProposalAction>,
}

/// `GET /proposals`: proposals changed since `last`, each carrying its most
/// recent audit trail.
pub async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListProposalsQuery>,
) -> Result<Json<Vec<ProposalWithActions>>, DomainError> {
    let limit = params.limit.unwrap_or(DEFAULT_PROPOSALS_LIMIT).clamp(1, 1000);
    let last = params
        .last
        .unwrap_or_else(|| Utc::now() - chrono::Duration::days(365));

    let proposals = state.proposals.list_changed_since(last, limit).await?;

    let mut out = Vec::with_capacity(proposals.len());
    for proposal in proposals {
        let actions = state
            .proposals
            .recent_actions(proposal.proposal_id, RECENT_ACTIONS_LIMIT)
            .await?;
        out.push(ProposalWithActions { proposal, actions });
    }

    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub struct ProposalActionRequest {
    pub actor: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub note: Option<String>,
}

fn parse_source(raw: Option<&str>) -> ActionSource {
    match raw {
        Some("system") => ActionSource::System,
        _ => ActionSource::User,
    }
}

async fn transition(
    state: Arc<AppState>,
    id: Uuid,
    req: ProposalActionRequest,
    transition: ProposalTransition,
) -> Result<Json<ProposalRecord>, DomainError> {
    let source = parse_source(req.source.as_deref());
    let mut record = state
        .proposals
        .apply_transition(id, transition, Utc::now(), req.actor, source)
        .await
        .map_err(|e| match e {
            agingos_storage::StorageError::Query(sqlx::Error::RowNotFound) => {
                DomainError::NotFound(format!("proposal {id} not found"))
            }
            agingos_storage::StorageError::Query(sqlx::Error::Protocol(msg)) => {
                DomainError::TransitionNotAllowed(msg)
            }
            other => DomainError::Database(other.to_string()),
        })?;

    if let Some(note) = req.note {
        record.last_note = Some(note);
    }

    Ok(Json(record))
}

/// `POST /proposals/{id}/test`.
pub async fn test_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProposalActionRequest>,
) -> Result<Json<ProposalRecord>, DomainError> {
    transition(state, id, req, ProposalTransition::Test).await
}

/// `POST /proposals/{id}/activate`.
pub async fn activate_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProposalActionRequest>,
) -> Result<Json<ProposalRecord>, DomainError> {
    transition(state, id, req, ProposalTransition::Activate).await
}

/// `POST /proposals/{id}/reject`.
pub async fn reject_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProposalActionRequest>,
) -> Result<Json<ProposalRecord>, DomainError> {
    transition(state, id, req, ProposalTransition::Reject).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_defaults_to_user() {
        assert_eq!(parse_source(None), ActionSource::User);
        assert_eq!(parse_source(Some("caregiver")), ActionSource::User);
    }

    #[test]
    fn parse_source_recognizes_system() {
        assert_eq!(parse_source(Some("system")), ActionSource::System);
    }
}
