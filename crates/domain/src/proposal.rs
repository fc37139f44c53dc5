//! Proposal miner output types (C9) and the proposal lifecycle transition
//! policy (C10). As with deviations, the transition decision itself is a
//! pure function so it can be unit tested without a database transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The four proposal types the miner can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalType {
    NightActivityEarlySignal1Of7,
    DoorAnomalyBurst3Of14,
    MvpBootstrapAnyL21Of7,
    NightActivityFrequent4Of7,
}

impl ProposalType {
    pub fn priority(&self) -> i32 {
        match self {
            ProposalType::NightActivityEarlySignal1Of7 => 35,
            ProposalType::DoorAnomalyBurst3Of14 => 40,
            ProposalType::MvpBootstrapAnyL21Of7 => 10,
            ProposalType::NightActivityFrequent4Of7 => 60,
        }
    }

    pub fn action_target(&self) -> &'static str {
        match self {
            ProposalType::NightActivityEarlySignal1Of7 => "monitor:R-001",
            ProposalType::DoorAnomalyBurst3Of14 => "monitor:R-002",
            ProposalType::MvpBootstrapAnyL21Of7 => "monitor:R-003",
            ProposalType::NightActivityFrequent4Of7 => "monitor:R-001",
        }
    }
}

/// `dedupe_key` for `NIGHT_ACTIVITY_FREQUENT_4_OF_7`, the one proposal type
/// keyed by room rather than a fixed constant.
pub fn room_dedupe_key(room_id: &str) -> String {
    format!("room:{room_id}")
}

/// A single machine-readable reason backing a mined proposal, paired with
/// human-facing text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalReason {
    pub code: String,
    pub text: String,
    pub detail: Value,
}

/// A freshly mined proposal, pre-persistence — the output of C9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedProposal {
    pub proposal_type: ProposalType,
    pub dedupe_key: String,
    pub room_id: Option<String>,
    pub priority: i32,
    pub action_target: String,
    pub evidence: Value,
    pub why: Vec<ProposalReason>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl MinedProposal {
    pub fn new(
        proposal_type: ProposalType,
        dedupe_key: impl Into<String>,
        evidence: Value,
        why: Vec<ProposalReason>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            priority: proposal_type.priority(),
            action_target: proposal_type.action_target().to_string(),
            proposal_type,
            dedupe_key: dedupe_key.into(),
            room_id: None,
            evidence,
            why,
            window_start,
            window_end,
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

/// Lifecycle state of a persisted proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    New,
    Testing,
    Active,
    Rejected,
}

/// The four allowed lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalTransition {
    Test,
    Activate,
    Reject,
    AutoExpireTest,
}

impl ProposalTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalTransition::Test => "TEST",
            ProposalTransition::Activate => "ACTIVATE",
            ProposalTransition::Reject => "REJECT",
            ProposalTransition::AutoExpireTest => "AUTO_EXPIRE_TEST",
        }
    }
}

/// A persisted proposal row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub proposal_id: Uuid,
    pub proposal_type: ProposalType,
    pub dedupe_key: String,
    pub room_id: Option<String>,
    pub state: ProposalState,
    pub priority: i32,
    pub action_target: String,
    pub evidence: Value,
    pub why: Vec<ProposalReason>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub first_detected_at: DateTime<Utc>,
    pub last_detected_at: DateTime<Utc>,
    pub test_started_at: Option<DateTime<Utc>>,
    pub test_until: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub last_source: Option<String>,
    pub last_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who or what drove a transition, persisted on its audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionSource {
    User,
    System,
}

/// An audit row appended for every successful transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalAction {
    pub action_id: Uuid,
    pub proposal_id: Uuid,
    pub prev_state: ProposalState,
    pub new_state: ProposalState,
    pub action: ProposalTransition,
    pub actor: Option<String>,
    pub source: ActionSource,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Default test window length for the `TEST` transition.
pub const TEST_WINDOW_DAYS: i64 = 7;

/// Decide whether `transition` is legal from `from`, and if so what the
/// resulting state is. Pure: no I/O, no clock reads besides what's passed in.
pub fn decide_transition(
    from: ProposalState,
    transition: ProposalTransition,
) -> Result<ProposalState, String> {
    use ProposalState::*;
    use ProposalTransition::*;
    match (from, transition) {
        (New, Test) | (Testing, Test) => Ok(Testing),
        (New, Activate) | (Testing, Activate) => Ok(Active),
        (New, Reject) | (Testing, Reject) | (Active, Reject) => Ok(Rejected),
        (Testing, AutoExpireTest) => Ok(New),
        _ => Err(format!(
            "transition {:?} not allowed from state {:?}",
            transition, from
        )),
    }
}

/// Apply a legal transition onto a record in place, setting the fields the
/// lifecycle spec calls for. Caller must have already validated the
/// transition via `decide_transition` (or re-derives the same result here).
pub fn apply_transition(
    row: &mut ProposalRecord,
    transition: ProposalTransition,
    now: DateTime<Utc>,
    actor: Option<String>,
    source: ActionSource,
) -> Result<ProposalAction, String> {
    let prev_state = row.state;
    let new_state = decide_transition(prev_state, transition)?;

    match transition {
        ProposalTransition::Test => {
            row.test_started_at = Some(now);
            row.test_until = Some(now + chrono::Duration::days(TEST_WINDOW_DAYS));
            row.activated_at = None;
        }
        ProposalTransition::Activate => {
            row.activated_at = Some(now);
            row.test_started_at = None;
            row.test_until = None;
        }
        ProposalTransition::Reject => {
            row.rejected_at = Some(now);
            row.test_started_at = None;
            row.test_until = None;
            row.activated_at = None;
        }
        ProposalTransition::AutoExpireTest => {
            row.test_started_at = None;
            row.test_until = None;
            row.last_source = Some("system".to_string());
            row.last_note = Some("test expired -> NEW".to_string());
        }
    }

    row.state = new_state;
    row.updated_at = now;

    Ok(ProposalAction {
        action_id: Uuid::new_v4(),
        proposal_id: row.proposal_id,
        prev_state,
        new_state,
        action: transition,
        actor,
        source,
        note: row.last_note.clone(),
        created_at: now,
    })
}

/// Whether a TESTING proposal's test window has lapsed and should be
/// auto-expired back to NEW by the scheduler's expiry sweep.
pub fn is_test_expired(row: &ProposalRecord, now: DateTime<Utc>) -> bool {
    row.state == ProposalState::Testing
        && row.test_until.map(|until| until < now).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(state: ProposalState) -> ProposalRecord {
        let now = Utc::now();
        ProposalRecord {
            proposal_id: Uuid::new_v4(),
            proposal_type: ProposalType::NightActivityFrequent4Of7,
            dedupe_key: room_dedupe_key("kitchen"),
            room_id: Some("kitchen".to_string()),
            state,
            priority: 60,
            action_target: "monitor:R-001".to_string(),
            evidence: serde_json::json!({}),
            why: vec![],
            window_start: now,
            window_end: now,
            first_detected_at: now,
            last_detected_at: now,
            test_started_at: None,
            test_until: None,
            activated_at: None,
            rejected_at: None,
            last_source: None,
            last_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn new_to_testing_to_active_is_allowed() {
        assert_eq!(
            decide_transition(ProposalState::New, ProposalTransition::Test),
            Ok(ProposalState::Testing)
        );
        assert_eq!(
            decide_transition(ProposalState::Testing, ProposalTransition::Activate),
            Ok(ProposalState::Active)
        );
    }

    #[test]
    fn reject_allowed_from_any_non_terminal_state() {
        for state in [ProposalState::New, ProposalState::Testing, ProposalState::Active] {
            assert_eq!(
                decide_transition(state, ProposalTransition::Reject),
                Ok(ProposalState::Rejected)
            );
        }
    }

    #[test]
    fn auto_expire_test_only_from_testing() {
        assert_eq!(
            decide_transition(ProposalState::Testing, ProposalTransition::AutoExpireTest),
            Ok(ProposalState::New)
        );
        assert!(decide_transition(ProposalState::New, ProposalTransition::AutoExpireTest).is_err());
        assert!(decide_transition(ProposalState::Active, ProposalTransition::AutoExpireTest).is_err());
    }

    #[test]
    fn rejected_is_terminal() {
        assert!(decide_transition(ProposalState::Rejected, ProposalTransition::Test).is_err());
        assert!(decide_transition(ProposalState::Rejected, ProposalTransition::Activate).is_err());
    }

    #[test]
    fn apply_test_transition_sets_window_and_clears_activation() {
        let mut row = sample(ProposalState::New);
        row.activated_at = Some(Utc::now());
        let now = Utc::now();
        let action = apply_transition(&mut row, ProposalTransition::Test, now, None, ActionSource::User).unwrap();
        assert_eq!(row.state, ProposalState::Testing);
        assert_eq!(row.test_started_at, Some(now));
        assert_eq!(row.test_until, Some(now + chrono::Duration::days(7)));
        assert!(row.activated_at.is_none());
        assert_eq!(action.prev_state, ProposalState::New);
        assert_eq!(action.new_state, ProposalState::Testing);
    }

    #[test]
    fn auto_expire_test_annotates_system_source() {
        let mut row = sample(ProposalState::Testing);
        row.test_until = Some(Utc::now() - chrono::Duration::hours(1));
        let now = Utc::now();
        apply_transition(&mut row, ProposalTransition::AutoExpireTest, now, None, ActionSource::System).unwrap();
        assert_eq!(row.state, ProposalState::New);
        assert_eq!(row.last_source.as_deref(), Some("system"));
        assert_eq!(row.last_note.as_deref(), Some("test expired -> NEW"));
        assert!(row.test_until.is_none());
    }

    #[test]
    fn is_test_expired_checks_window_and_state() {
        let mut row = sample(ProposalState::Testing);
        let now = Utc::now();
        row.test_until = Some(now - chrono::Duration::minutes(1));
        assert!(is_test_expired(&row, now));

        row.test_until = Some(now + chrono::Duration::minutes(1));
        assert!(!is_test_expired(&row, now));

        row.state = ProposalState::New;
        row.test_until = Some(now - chrono::Duration::minutes(1));
        assert!(!is_test_expired(&row, now));
    }
}
