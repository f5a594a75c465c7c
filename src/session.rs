use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::prior::{MAX_EFFECTIVE_PRECISION, MIN_EFFECTIVE_PRECISION};

pub const DEFAULT_AGENT_PRECISION: f64 = 1.0;
pub const DEFAULT_SPOTLIGHT_PRECISION: f64 = 0.5;

/// A change to one agent's attention state.
///
/// ```
/// use ponder::session::Modulation;
///
/// let m: Modulation = serde_json::from_str(r#"{"kind":"precision_delta","delta":0.5}"#).unwrap();
/// assert_eq!(m, Modulation::PrecisionDelta { delta: 0.5 });
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modulation {
    PrecisionDelta { delta: f64 },
    SetPrecision { value: f64 },
    FocusTarget { target: String },
    SpotlightPrecision { value: f64 },
}

impl Modulation {
    /// Reject values that cannot be applied.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Modulation::PrecisionDelta { delta } if !delta.is_finite() => Err(
                ValidationError::InvalidModulation(format!("precision delta {delta} is not finite")),
            ),
            Modulation::SetPrecision { value } if !value.is_finite() || *value <= 0.0 => {
                Err(ValidationError::InvalidModulation(format!(
                    "precision {value} must be positive"
                )))
            }
            Modulation::SpotlightPrecision { value } if !value.is_finite() || *value < 0.0 => {
                Err(ValidationError::InvalidModulation(format!(
                    "spotlight precision {value} must be non-negative"
                )))
            }
            Modulation::FocusTarget { target } if target.trim().is_empty() => Err(
                ValidationError::InvalidModulation("focus target is empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spotlight {
    pub target: Option<String>,
    pub precision: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub precision: f64,
    pub spotlight: Spotlight,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            precision: DEFAULT_AGENT_PRECISION,
            spotlight: Spotlight {
                target: None,
                precision: DEFAULT_SPOTLIGHT_PRECISION,
            },
        }
    }
}

/// Per-agent precision and attention spotlight.
///
/// Owned by the caller and passed by reference. Hosts that share a registry
/// across threads wrap it in a mutex.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentState> {
        self.agents.get(agent_id)
    }

    /// Precision for `agent_id`, or the default for unknown agents.
    pub fn precision(&self, agent_id: &str) -> f64 {
        self.agents
            .get(agent_id)
            .map_or(DEFAULT_AGENT_PRECISION, |a| a.precision)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn remove(&mut self, agent_id: &str) -> Option<AgentState> {
        self.agents.remove(agent_id)
    }

    /// Validate and apply a modulation, creating the agent on first use.
    pub fn apply(
        &mut self,
        agent_id: &str,
        modulation: Modulation,
    ) -> Result<&AgentState, ValidationError> {
        modulation.validate()?;
        let state = self.agents.entry(agent_id.to_string()).or_default();
        match modulation {
            Modulation::PrecisionDelta { delta } => {
                state.precision = clamp_precision(state.precision + delta);
            }
            Modulation::SetPrecision { value } => {
                state.precision = clamp_precision(value);
            }
            Modulation::FocusTarget { target } => {
                state.spotlight.target = Some(target);
            }
            Modulation::SpotlightPrecision { value } => {
                state.spotlight.precision = value.clamp(0.0, 1.0);
            }
        }
        debug!(agent_id, precision = state.precision, spotlight = ?state.spotlight.target, "agent modulated");
        Ok(state)
    }
}

fn clamp_precision(value: f64) -> f64 {
    value.clamp(MIN_EFFECTIVE_PRECISION, MAX_EFFECTIVE_PRECISION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_moves_within_bounds() {
        let mut registry = AgentRegistry::new();
        let state = registry
            .apply("a", Modulation::PrecisionDelta { delta: 10.0 })
            .unwrap();
        assert_eq!(state.precision, MAX_EFFECTIVE_PRECISION);
        let state = registry
            .apply("a", Modulation::PrecisionDelta { delta: -10.0 })
            .unwrap();
        assert_eq!(state.precision, MIN_EFFECTIVE_PRECISION);
        assert_eq!(registry.precision("unknown"), DEFAULT_AGENT_PRECISION);
    }

    #[test]
    fn agents_are_isolated() {
        let mut registry = AgentRegistry::new();
        registry
            .apply("a", Modulation::SetPrecision { value: 2.0 })
            .unwrap();
        registry
            .apply("b", Modulation::FocusTarget { target: "door".into() })
            .unwrap();
        assert_eq!(registry.precision("a"), 2.0);
        assert_eq!(registry.precision("b"), DEFAULT_AGENT_PRECISION);
        assert_eq!(
            registry.get("b").unwrap().spotlight.target.as_deref(),
            Some("door")
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn spotlight_precision_is_unit_bounded() {
        let mut registry = AgentRegistry::new();
        let state = registry
            .apply("a", Modulation::SpotlightPrecision { value: 3.0 })
            .unwrap();
        assert_eq!(state.spotlight.precision, 1.0);
    }

    #[test]
    fn invalid_modulations_leave_state_untouched() {
        let mut registry = AgentRegistry::new();
        let err = registry
            .apply("a", Modulation::SetPrecision { value: -1.0 })
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidModulation(_)));
        assert!(registry
            .apply("a", Modulation::FocusTarget { target: " ".into() })
            .is_err());
        assert!(registry
            .apply("a", Modulation::PrecisionDelta { delta: f64::NAN })
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let parsed: Result<Modulation, _> = serde_json::from_str(r#"{"kind":"teleport"}"#);
        assert!(parsed.is_err());
    }
}
