use std::path::Path;

use serde::Deserialize;

use crate::agency::{AgencyDetector, DEFAULT_BINS, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD};
use crate::efe::EfeScorer;
use crate::epistemic::{DEFAULT_GAIN_THRESHOLD, DEFAULT_HISTORY_WINDOW, EpistemicGainDetector};
use crate::error::ValidationError;
use crate::logging::LogLevel;
use crate::particle::{MAX_NESTING_DEPTH, ParticleClassifier};
use crate::prior::{
    ConstraintRecord, MAX_EFFECTIVE_PRECISION, MIN_EFFECTIVE_PRECISION, PriorConstraint,
    PriorHierarchy,
};
use crate::working_memory::TokenBudgetManager;

/// Engine settings. Every section and field is optional in TOML.
///
/// ```toml
/// [priors]
/// base_precision = 1.5
///
/// [[priors.constraints]]
/// name = "no-destruction"
/// level = "basal"
/// kind = "prohibit"
/// pattern = "delete.*database"
///
/// [memory]
/// total_budget = 4000
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub priors: PriorsConfig,
    pub efe: EfeConfig,
    pub particle: ParticleConfig,
    pub agency: AgencyConfig,
    pub gain: GainConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorsConfig {
    pub base_precision: f64,
    pub constraints: Vec<ConstraintRecord>,
}

impl Default for PriorsConfig {
    fn default() -> Self {
        Self {
            base_precision: 1.0,
            constraints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EfeConfig {
    pub agency_weight: f64,
    pub exploration_constant: f64,
}

impl Default for EfeConfig {
    fn default() -> Self {
        Self {
            agency_weight: 0.0,
            exploration_constant: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub max_nesting_depth: usize,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgencyConfig {
    pub bins: usize,
    pub high_threshold: f64,
    pub low_threshold: f64,
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BINS,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            low_threshold: DEFAULT_LOW_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    pub threshold: f64,
    pub adaptive: bool,
    pub window: usize,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GAIN_THRESHOLD,
            adaptive: false,
            window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub total_budget: usize,
    pub reserve_ratio: f64,
    pub persist_resonance_threshold: f64,
    pub persistence_queue_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_budget: 8000,
            reserve_ratio: 0.1,
            persist_resonance_threshold: 0.8,
            persistence_queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let cfg: EngineConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate the TOML file at `path`.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use tokio::fs;

        let text = fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&text)
    }

    /// Check ranges and compile every seed constraint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let base = self.priors.base_precision;
        if !(MIN_EFFECTIVE_PRECISION..=MAX_EFFECTIVE_PRECISION).contains(&base) {
            return Err(invalid(format!(
                "priors.base_precision {base} outside [{MIN_EFFECTIVE_PRECISION}, {MAX_EFFECTIVE_PRECISION}]"
            )));
        }
        self.seed_constraints()?;

        if !self.efe.agency_weight.is_finite() || self.efe.agency_weight < 0.0 {
            return Err(invalid("efe.agency_weight must be non-negative".into()));
        }
        if !self.efe.exploration_constant.is_finite() || self.efe.exploration_constant < 0.0 {
            return Err(invalid("efe.exploration_constant must be non-negative".into()));
        }

        let agency = &self.agency;
        if agency.bins == 0 {
            return Err(invalid("agency.bins must be positive".into()));
        }
        if !(agency.low_threshold < agency.high_threshold) {
            return Err(invalid(format!(
                "agency.low_threshold {} must be below high_threshold {}",
                agency.low_threshold, agency.high_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.gain.threshold) {
            return Err(invalid("gain.threshold must be in [0, 1]".into()));
        }
        if self.gain.window == 0 {
            return Err(invalid("gain.window must be positive".into()));
        }

        let memory = &self.memory;
        if !(0.0..1.0).contains(&memory.reserve_ratio) {
            return Err(invalid("memory.reserve_ratio must be in [0, 1)".into()));
        }
        if !(0.0..=1.0).contains(&memory.persist_resonance_threshold) {
            return Err(invalid(
                "memory.persist_resonance_threshold must be in [0, 1]".into(),
            ));
        }
        if memory.persistence_queue_capacity == 0 {
            return Err(invalid(
                "memory.persistence_queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    fn seed_constraints(&self) -> Result<Vec<PriorConstraint>, ValidationError> {
        self.priors
            .constraints
            .iter()
            .cloned()
            .map(PriorConstraint::try_from)
            .collect()
    }

    /// Hierarchy for `agent_id` holding the seed constraints.
    pub fn prior_hierarchy(
        &self,
        agent_id: impl Into<String>,
    ) -> Result<PriorHierarchy, ValidationError> {
        let mut hierarchy =
            PriorHierarchy::new(agent_id).with_base_precision(self.priors.base_precision);
        for constraint in self.seed_constraints()? {
            hierarchy.add(constraint);
        }
        Ok(hierarchy)
    }

    pub fn efe_scorer(&self) -> EfeScorer {
        EfeScorer::new()
            .agency_weight(self.efe.agency_weight)
            .exploration_constant(self.efe.exploration_constant)
    }

    pub fn particle_classifier(&self) -> ParticleClassifier {
        ParticleClassifier::new(self.particle.max_nesting_depth)
    }

    pub fn agency_detector(&self) -> AgencyDetector {
        AgencyDetector::new()
            .bins(self.agency.bins)
            .thresholds(self.agency.low_threshold, self.agency.high_threshold)
    }

    pub fn gain_detector(&self) -> EpistemicGainDetector {
        let detector = EpistemicGainDetector::new().threshold(self.gain.threshold);
        if self.gain.adaptive {
            detector.adaptive(self.gain.window)
        } else {
            detector
        }
    }

    pub fn budget_manager(&self) -> TokenBudgetManager {
        TokenBudgetManager::new(self.memory.total_budget, self.memory.reserve_ratio)
    }
}

fn invalid(msg: String) -> ValidationError {
    ValidationError::InvalidConfig(msg)
}
