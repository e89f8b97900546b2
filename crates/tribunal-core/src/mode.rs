//! Mode presets.
//!
//! A mode decides how many evaluators are consulted, how many escalation
//! triggers it takes to add more, and at which consensus levels the arbiter
//! is called. Presets are plain data and may be overridden from config.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregator::ConsensusLevel;

/// Cost/quality mode of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Eco,
    #[default]
    Balanced,
    Premium,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Eco => "eco",
            Mode::Balanced => "balanced",
            Mode::Premium => "premium",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eco" => Ok(Mode::Eco),
            "balanced" => Ok(Mode::Balanced),
            "premium" => Ok(Mode::Premium),
            other => Err(format!("Unknown mode: {}", other)),
        }
    }
}

/// Evaluator budget and gates for one mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModePolicy {
    /// Invoke every configured evaluator up front (primary first)
    #[serde(default)]
    pub invoke_all: bool,

    /// Active triggers needed to escalate; `None` never escalates
    #[serde(default)]
    pub escalation_min_triggers: Option<usize>,

    /// Evaluators added on escalation
    #[serde(default)]
    pub additional_evaluators: usize,

    /// Consensus levels that call the arbiter
    #[serde(default)]
    pub arbitrate_on: Vec<ConsensusLevel>,
}

impl ModePolicy {
    /// One evaluator, no escalation, no arbitration.
    pub fn eco() -> Self {
        Self {
            invoke_all: false,
            escalation_min_triggers: None,
            additional_evaluators: 0,
            arbitrate_on: Vec::new(),
        }
    }

    /// One evaluator, a second on two or more triggers, arbitration on weak consensus.
    pub fn balanced() -> Self {
        Self {
            invoke_all: false,
            escalation_min_triggers: Some(2),
            additional_evaluators: 1,
            arbitrate_on: vec![ConsensusLevel::Weak],
        }
    }

    /// Every evaluator, arbitration on weak or moderate consensus.
    pub fn premium() -> Self {
        Self {
            invoke_all: true,
            escalation_min_triggers: Some(1),
            additional_evaluators: 0,
            arbitrate_on: vec![ConsensusLevel::Weak, ConsensusLevel::Moderate],
        }
    }

    pub fn allows_escalation(&self) -> bool {
        self.escalation_min_triggers.is_some() && (self.invoke_all || self.additional_evaluators > 0)
    }

    /// Whether `active` triggers reach the escalation threshold.
    pub fn escalates_on(&self, active: usize) -> bool {
        self.escalation_min_triggers
            .map(|min| active >= min)
            .unwrap_or(false)
    }

    pub fn arbitrates_on(&self, level: ConsensusLevel) -> bool {
        self.arbitrate_on.contains(&level)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.escalation_min_triggers == Some(0) {
            return Err("escalation_min_triggers must be at least 1".to_string());
        }
        if self.arbitrate_on.contains(&ConsensusLevel::None) {
            return Err("arbitration cannot be gated on consensus level 'none'".to_string());
        }
        Ok(())
    }
}

/// The three presets, overridable as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModePresets {
    #[serde(default = "ModePolicy::eco")]
    pub eco: ModePolicy,

    #[serde(default = "ModePolicy::balanced")]
    pub balanced: ModePolicy,

    #[serde(default = "ModePolicy::premium")]
    pub premium: ModePolicy,
}

impl Default for ModePresets {
    fn default() -> Self {
        Self {
            eco: ModePolicy::eco(),
            balanced: ModePolicy::balanced(),
            premium: ModePolicy::premium(),
        }
    }
}

impl ModePresets {
    pub fn policy(&self, mode: Mode) -> &ModePolicy {
        match mode {
            Mode::Eco => &self.eco,
            Mode::Balanced => &self.balanced,
            Mode::Premium => &self.premium,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for mode in [Mode::Eco, Mode::Balanced, Mode::Premium] {
            self.policy(mode)
                .validate()
                .map_err(|e| format!("mode '{}': {}", mode, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_thresholds() {
        let presets = ModePresets::default();

        let eco = presets.policy(Mode::Eco);
        assert!(!eco.allows_escalation());
        assert!(!eco.escalates_on(4));
        assert!(!eco.arbitrates_on(ConsensusLevel::Weak));

        let balanced = presets.policy(Mode::Balanced);
        assert!(!balanced.escalates_on(1));
        assert!(balanced.escalates_on(2));
        assert!(balanced.arbitrates_on(ConsensusLevel::Weak));
        assert!(!balanced.arbitrates_on(ConsensusLevel::Moderate));

        let premium = presets.policy(Mode::Premium);
        assert!(premium.invoke_all);
        assert!(premium.escalates_on(1));
        assert!(premium.arbitrates_on(ConsensusLevel::Moderate));
        assert!(!premium.arbitrates_on(ConsensusLevel::Strong));
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("Premium".parse::<Mode>().unwrap(), Mode::Premium);
        assert!("turbo".parse::<Mode>().is_err());
        assert_eq!(Mode::Eco.to_string(), "eco");
    }

    #[test]
    fn test_presets_override_from_yaml() {
        let presets: ModePresets = serde_yaml::from_str(
            r#"
balanced:
  escalation_min_triggers: 3
  additional_evaluators: 2
  arbitrate_on: [weak, moderate]
"#,
        )
        .unwrap();
        assert_eq!(presets.balanced.escalation_min_triggers, Some(3));
        assert_eq!(presets.eco, ModePolicy::eco());
        assert!(presets.validate().is_ok());
    }

    #[test]
    fn test_invalid_policy() {
        let mut presets = ModePresets::default();
        presets.premium.escalation_min_triggers = Some(0);
        assert!(presets.validate().is_err());
    }
}
