//! Rule engine (C5): a registry of pure, deterministic rule evaluators.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::deviation::{DeviationV1, Severity, Window};
use crate::errors::DomainError;
use crate::event::{EventCategory, EventQuery, EventReader};

/// A single rule: pure and deterministic given `(events in [since,until),
/// now)`. Implementations must not read any clock or external state besides
/// what `evaluate` is handed.
#[async_trait::async_trait]
pub trait Rule: Send + Sync {
    fn rule_id(&self) -> &'static str;

    async fn evaluate(
        &self,
        reader: &dyn EventReader,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviationV1>, DomainError>;
}

/// **R-001 No motion**: one MEDIUM deviation if no `motion` event exists in
/// `[since, until)`.
pub struct NoMotionRule;

#[async_trait::async_trait]
impl Rule for NoMotionRule {
    fn rule_id(&self) -> &'static str {
        "R-001"
    }

    async fn evaluate(
        &self,
        reader: &dyn EventReader,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<Vec<DeviationV1>, DomainError> {
        let motion_events = reader
            .query_events(
                since,
                until,
                EventQuery {
                    category: Some(EventCategory::Motion),
                    room: None,
                    limit: Some(1),
                },
            )
            .await?;

        if !motion_events.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![DeviationV1 {
            rule_id: self.rule_id().to_string(),
            timestamp: until,
            severity: Severity::Medium,
            title: "Ingen bevegelse registrert i valgt tidsvindu".to_string(),
            explanation: format!(
                "Ingen bevegelsessensor har utl\u{00f8}st i perioden {since} til {until}."
            ),
            evidence: vec![],
            window: Window { since, until },
        }])
    }
}

/// **R-002 Front door at night**: one HIGH deviation if any `door` event
/// with `state=open` falls inside the configured night window. All matching
/// events (not just the first) are collected as evidence.
pub struct FrontDoorAtNightRule {
    pub night_start_local: NaiveTime,
    pub night_end_local: NaiveTime,
    pub tz: Tz,
}

impl Default for FrontDoorAtNightRule {
    fn default() -> Self {
        Self {
            night_start_local: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            night_end_local: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            tz: chrono_tz::Europe::Oslo,
        }
    }
}

#[async_trait::async_trait]
impl Rule for FrontDoorAtNightRule {
    fn rule_id(&self) -> &'static str {
        "R-002"
    }

    async fn evaluate(
        &self,
        reader: &dyn EventReader,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<Vec<DeviationV1>, DomainError> {
        let door_events = reader
            .query_events(
                since,
                until,
                EventQuery {
                    category: Some(EventCategory::Door),
                    room: None,
                    limit: None,
                },
            )
            .await?;

        let mut evidence = Vec::new();
        for event in &door_events {
            if event.is_door_open()
                && crate::time::is_night_local(
                    event.timestamp,
                    self.tz,
                    self.night_start_local,
                    self.night_end_local,
                )
            {
                evidence.push(event.id.clone());
            }
        }

        if evidence.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![DeviationV1 {
            rule_id: self.rule_id().to_string(),
            timestamp: until,
            severity: Severity::High,
            title: "D\u{00f8}r \u{e5}pnet om natten".to_string(),
            explanation: "En ytterd\u{00f8}r ble registrert \u{e5}pen i nattvinduet.".to_string(),
            evidence,
            window: Window { since, until },
        }])
    }
}

/// **R-003 Door open, no motion after**: for each front-door `open` event,
/// check for any `motion=on` in `[t, t + followup_minutes)`. The first
/// unfollowed door-open aborts iteration.
pub struct DoorNoMotionAfterRule {
    pub followup_minutes: i64,
}

impl Default for DoorNoMotionAfterRule {
    fn default() -> Self {
        Self { followup_minutes: 10 }
    }
}

#[async_trait::async_trait]
impl Rule for DoorNoMotionAfterRule {
    fn rule_id(&self) -> &'static str {
        "R-003"
    }

    async fn evaluate(
        &self,
        reader: &dyn EventReader,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<Vec<DeviationV1>, DomainError> {
        let door_events = reader
            .query_events(
                since,
                until,
                EventQuery {
                    category: Some(EventCategory::Door),
                    room: None,
                    limit: None,
                },
            )
            .await?;

        for door_event in &door_events {
            if !door_event.is_door_open() || door_event.door_name() != Some("front") {
                continue;
            }

            let followup_until = door_event.timestamp + chrono::Duration::minutes(self.followup_minutes);
            let motion_events = reader
                .query_events(
                    door_event.timestamp,
                    followup_until,
                    EventQuery {
                        category: Some(EventCategory::Motion),
                        room: None,
                        limit: None,
                    },
                )
                .await?;

            let followed_up = motion_events.iter().any(|e| e.is_motion_on());
            if !followed_up {
                return Ok(vec![DeviationV1 {
                    rule_id: self.rule_id().to_string(),
                    timestamp: until,
                    severity: Severity::Medium,
                    title: "D\u{00f8}r \u{e5}pnet uten p\u{00e5}f\u{00f8}lgende bevegelse".to_string(),
                    explanation: format!(
                        "Ingen bevegelse ble registrert innen {} minutter etter at ytterd\u{00f8}ren ble \u{e5}pnet.",
                        self.followup_minutes
                    ),
                    evidence: vec![door_event.id.clone()],
                    window: Window { since, until },
                }]);
            }
        }

        Ok(vec![])
    }
}

/// A registry of rules in deterministic (insertion) order.
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn register(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.rule_id()).collect()
    }

    /// Evaluate rules in registry order over the shared `[since, until)`
    /// window. If `only` is non-empty, restricts to those rule ids.
    pub async fn evaluate(
        &self,
        reader: &dyn EventReader,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
        only: Option<&[&str]>,
    ) -> Result<Vec<DeviationV1>, DomainError> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if let Some(ids) = only {
                if !ids.contains(&rule.rule_id()) {
                    continue;
                }
            }
            out.extend(rule.evaluate(reader, since, until, now).await?);
        }
        Ok(out)
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
            .register(Box::new(NoMotionRule))
            .register(Box::new(FrontDoorAtNightRule::default()))
            .register(Box::new(DoorNoMotionAfterRule::default()))
    }
}
