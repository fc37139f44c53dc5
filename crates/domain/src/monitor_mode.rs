//! Per-rule monitor mode: lets an operator silence or dry-run a rule
//! without disabling it in the scheduler registry.

use serde::{Deserialize, Serialize};

/// Gating applied to a rule's evaluation output before it reaches the
/// deviation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorMode {
    /// Suppress entirely: the rule still runs, but nothing is persisted.
    Off,
    /// Persist deviations but tag them as test-mode in evidence.
    Test,
    /// Normal operation.
    On,
}

impl Default for MonitorMode {
    fn default() -> Self {
        MonitorMode::On
    }
}

impl MonitorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorMode::Off => "OFF",
            MonitorMode::Test => "TEST",
            MonitorMode::On => "ON",
        }
    }
}

impl std::str::FromStr for MonitorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Ok(MonitorMode::Off),
            "TEST" => Ok(MonitorMode::Test),
            "ON" => Ok(MonitorMode::On),
            other => Err(format!("unknown monitor mode: {other}")),
        }
    }
}

/// What the scheduler should do with a rule's freshly evaluated deviations
/// given its current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Suppress,
    PersistTagged,
    Persist,
}

pub fn gate(mode: MonitorMode) -> GateAction {
    match mode {
        MonitorMode::Off => GateAction::Suppress,
        MonitorMode::Test => GateAction::PersistTagged,
        MonitorMode::On => GateAction::Persist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_suppresses_test_tags_on_persists() {
        assert_eq!(gate(MonitorMode::Off), GateAction::Suppress);
        assert_eq!(gate(MonitorMode::Test), GateAction::PersistTagged);
        assert_eq!(gate(MonitorMode::On), GateAction::Persist);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("off".parse::<MonitorMode>().unwrap(), MonitorMode::Off);
        assert_eq!("Test".parse::<MonitorMode>().unwrap(), MonitorMode::Test);
        assert!("bogus".parse::<MonitorMode>().is_err());
    }
}
