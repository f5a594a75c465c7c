use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ValidationError;

/// Longest pattern a constraint may carry.
pub const MAX_PATTERN_LEN: usize = 500;
/// Bounds for both the hierarchy base precision and the gated result.
pub const MIN_EFFECTIVE_PRECISION: f64 = 0.1;
pub const MAX_EFFECTIVE_PRECISION: f64 = 5.0;

const DISPOSITIONAL_PROHIBIT_PENALTY: f64 = 0.3;
const DISPOSITIONAL_REQUIRE_PENALTY: f64 = 0.2;
const LEARNED_BIAS: f64 = 0.1;

/// Tier of a prior constraint. Checking order is always
/// basal, dispositional, learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorLevel {
    /// Hard safety rules. Never bypassed.
    Basal,
    /// Slow-changing values. Warn and dampen precision.
    Dispositional,
    /// Fast-adapting preferences. Bias precision only.
    Learned,
}

impl fmt::Display for PriorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriorLevel::Basal => "BASAL",
            PriorLevel::Dispositional => "DISPOSITIONAL",
            PriorLevel::Learned => "LEARNED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    Prohibit,
    Require,
    Prefer,
}

/// A single rule in a [`PriorHierarchy`].
///
/// The pattern is compiled once, case-insensitively, when the constraint is
/// built. A malformed or oversized pattern is rejected there and never at
/// check time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ConstraintRecord", into = "ConstraintRecord")]
pub struct PriorConstraint {
    pub id: String,
    pub name: String,
    pub description: String,
    pub level: PriorLevel,
    pub kind: ConstraintKind,
    regex: Regex,
    /// Weight in `[0, 1]`.
    pub precision: f64,
    pub active: bool,
}

/// Plain form of a [`PriorConstraint`] used for persistence and config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintRecord {
    #[serde(default = "new_constraint_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub level: PriorLevel,
    pub kind: ConstraintKind,
    pub pattern: String,
    #[serde(default = "default_weight")]
    pub precision: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn new_constraint_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}

impl TryFrom<ConstraintRecord> for PriorConstraint {
    type Error = ValidationError;

    fn try_from(record: ConstraintRecord) -> Result<Self, Self::Error> {
        let mut constraint =
            PriorConstraint::new(record.name, record.level, record.kind, &record.pattern)?
                .with_precision(record.precision)
                .describe(record.description);
        constraint.id = record.id;
        constraint.active = record.active;
        Ok(constraint)
    }
}

impl From<PriorConstraint> for ConstraintRecord {
    fn from(c: PriorConstraint) -> Self {
        Self {
            pattern: c.regex.as_str().to_string(),
            id: c.id,
            name: c.name,
            description: c.description,
            level: c.level,
            kind: c.kind,
            precision: c.precision,
            active: c.active,
        }
    }
}

impl PriorConstraint {
    /// Compile a new active constraint with full precision.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PatternTooLong`] past [`MAX_PATTERN_LEN`]
    /// characters and [`ValidationError::InvalidPattern`] when the pattern
    /// does not compile.
    pub fn new(
        name: impl Into<String>,
        level: PriorLevel,
        kind: ConstraintKind,
        pattern: &str,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let len = pattern.chars().count();
        if len > MAX_PATTERN_LEN {
            return Err(ValidationError::PatternTooLong {
                name,
                len,
                limit: MAX_PATTERN_LEN,
            });
        }
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ValidationError::InvalidPattern {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            id: new_constraint_id(),
            name,
            description: String::new(),
            level,
            kind,
            regex,
            precision: 1.0,
            active: true,
        })
    }

    /// Sets the precision weight, clamped to `[0, 1]`.
    pub fn with_precision(mut self, weight: f64) -> Self {
        self.precision = clamp_weight(weight);
        self
    }

    /// Sets the human-readable description used in block reasons.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, action: &str) -> bool {
        self.regex.is_match(action)
    }

    /// Whether `action` breaks this rule: a prohibited pattern is present or a
    /// required one is missing.
    pub fn violated_by(&self, action: &str) -> bool {
        match self.kind {
            ConstraintKind::Prohibit => self.matches(action),
            ConstraintKind::Require => !self.matches(action),
            ConstraintKind::Prefer => false,
        }
    }

    /// Move the weight toward 1 when the rule was confirmed by evidence and
    /// toward 0 when it was contradicted. Basal weights never move.
    pub fn update_precision(&mut self, confirmed: bool, rate: f64) {
        if self.level == PriorLevel::Basal {
            return;
        }
        let target = if confirmed { 1.0 } else { 0.0 };
        let rate = rate.clamp(0.0, 1.0);
        self.precision = clamp_weight(self.precision + rate * (target - self.precision));
    }

    fn block_reason(&self) -> String {
        let verb = match self.kind {
            ConstraintKind::Require => "requires a match it did not find",
            _ => "prohibits this action",
        };
        if self.description.is_empty() {
            format!("blocked by {} constraint '{}': {}", self.level, self.name, verb)
        } else {
            format!(
                "blocked by {} constraint '{}': {}",
                self.level, self.name, self.description
            )
        }
    }
}

fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, 1.0)
    }
}

/// Outcome of gating one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorCheck {
    pub permitted: bool,
    /// Name of the basal constraint that blocked the action.
    pub blocked_by: Option<String>,
    pub blocking_level: Option<PriorLevel>,
    /// Human-readable block reason.
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    pub effective_precision: f64,
}

/// Anything carrying an optional action string that can be gated.
pub trait ProposesAction {
    fn action(&self) -> Option<&str>;
}

/// A candidate that survived gating, with its gate annotations.
#[derive(Debug, Clone)]
pub struct Gated<T> {
    pub item: T,
    pub check: PriorCheck,
}

/// Three-tier constraint hierarchy owned by a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorHierarchy {
    pub agent_id: String,
    #[serde(default)]
    basal: Vec<PriorConstraint>,
    #[serde(default)]
    dispositional: Vec<PriorConstraint>,
    #[serde(default)]
    learned: Vec<PriorConstraint>,
    #[serde(default = "default_base_precision")]
    base_precision: f64,
}

fn default_base_precision() -> f64 {
    1.0
}

impl PriorHierarchy {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            basal: Vec::new(),
            dispositional: Vec::new(),
            learned: Vec::new(),
            base_precision: default_base_precision(),
        }
    }

    /// Sets the starting precision, clamped to `[0.1, 5.0]`.
    pub fn with_base_precision(mut self, precision: f64) -> Self {
        self.set_base_precision(precision);
        self
    }

    pub fn set_base_precision(&mut self, precision: f64) {
        self.base_precision = if precision.is_nan() {
            default_base_precision()
        } else {
            precision.clamp(MIN_EFFECTIVE_PRECISION, MAX_EFFECTIVE_PRECISION)
        };
    }

    pub fn base_precision(&self) -> f64 {
        self.base_precision
    }

    /// Add a constraint to the list for its level.
    pub fn add(&mut self, constraint: PriorConstraint) {
        self.level_mut(constraint.level).push(constraint);
    }

    /// Builder form of [`PriorHierarchy::add`].
    pub fn with(mut self, constraint: PriorConstraint) -> Self {
        self.add(constraint);
        self
    }

    /// Remove a constraint by id, returning it.
    pub fn remove(&mut self, id: &str) -> Option<PriorConstraint> {
        for list in [&mut self.basal, &mut self.dispositional, &mut self.learned] {
            if let Some(pos) = list.iter().position(|c| c.id == id) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PriorConstraint> {
        self.basal
            .iter_mut()
            .chain(self.dispositional.iter_mut())
            .chain(self.learned.iter_mut())
            .find(|c| c.id == id)
    }

    pub fn constraints(&self, level: PriorLevel) -> &[PriorConstraint] {
        match level {
            PriorLevel::Basal => &self.basal,
            PriorLevel::Dispositional => &self.dispositional,
            PriorLevel::Learned => &self.learned,
        }
    }

    /// All constraints in checking order.
    pub fn iter(&self) -> impl Iterator<Item = &PriorConstraint> {
        self.basal
            .iter()
            .chain(self.dispositional.iter())
            .chain(self.learned.iter())
    }

    pub fn len(&self) -> usize {
        self.basal.len() + self.dispositional.len() + self.learned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn level_mut(&mut self, level: PriorLevel) -> &mut Vec<PriorConstraint> {
        match level {
            PriorLevel::Basal => &mut self.basal,
            PriorLevel::Dispositional => &mut self.dispositional,
            PriorLevel::Learned => &mut self.learned,
        }
    }

    /// Fold another hierarchy into this one.
    ///
    /// Unknown constraint ids are appended. For ids already present, an
    /// incoming learned constraint replaces the existing learned one while
    /// basal and dispositional entries keep their current form.
    pub fn merge(&mut self, other: &PriorHierarchy) {
        for incoming in other.iter() {
            match self.get_mut(&incoming.id) {
                Some(existing)
                    if existing.level == PriorLevel::Learned
                        && incoming.level == PriorLevel::Learned =>
                {
                    *existing = incoming.clone();
                }
                Some(_) => {}
                None => self.add(incoming.clone()),
            }
        }
    }

    /// Gate `action` through the hierarchy.
    ///
    /// Basal rules hard-block and short-circuit. Dispositional rules warn and
    /// dampen precision. Learned rules nudge precision up or down. A blank
    /// action is permitted with a warning.
    pub fn check(&self, action: &str) -> PriorCheck {
        if action.trim().is_empty() {
            return PriorCheck {
                permitted: true,
                blocked_by: None,
                blocking_level: None,
                reason: None,
                warnings: vec!["no action supplied; permitted by default".into()],
                effective_precision: self.base_precision,
            };
        }

        if let Some(rule) = self
            .basal
            .iter()
            .filter(|c| c.active)
            .find(|c| c.violated_by(action))
        {
            let reason = rule.block_reason();
            warn!(agent = %self.agent_id, constraint = %rule.name, "action blocked by basal prior");
            return PriorCheck {
                permitted: false,
                blocked_by: Some(rule.name.clone()),
                blocking_level: Some(PriorLevel::Basal),
                reason: Some(reason),
                warnings: Vec::new(),
                effective_precision: 0.0,
            };
        }

        let mut precision = self.base_precision;
        let mut warnings = Vec::new();

        for rule in self.dispositional.iter().filter(|c| c.active) {
            let penalty = match rule.kind {
                ConstraintKind::Prohibit if rule.matches(action) => {
                    warnings.push(format!(
                        "dispositional constraint '{}' discourages this action",
                        rule.name
                    ));
                    DISPOSITIONAL_PROHIBIT_PENALTY
                }
                ConstraintKind::Require if !rule.matches(action) => {
                    warnings.push(format!(
                        "dispositional constraint '{}' expects a pattern this action lacks",
                        rule.name
                    ));
                    DISPOSITIONAL_REQUIRE_PENALTY
                }
                _ => continue,
            };
            precision *= 1.0 - rule.precision * penalty;
        }

        for rule in self.learned.iter().filter(|c| c.active) {
            if !rule.matches(action) {
                continue;
            }
            match rule.kind {
                ConstraintKind::Prefer => precision *= 1.0 + rule.precision * LEARNED_BIAS,
                ConstraintKind::Prohibit => precision *= 1.0 - rule.precision * LEARNED_BIAS,
                ConstraintKind::Require => {}
            }
        }

        let effective_precision = precision.clamp(MIN_EFFECTIVE_PRECISION, MAX_EFFECTIVE_PRECISION);
        debug!(agent = %self.agent_id, effective_precision, warnings = warnings.len(), "action permitted");
        PriorCheck {
            permitted: true,
            blocked_by: None,
            blocking_level: None,
            reason: None,
            warnings,
            effective_precision,
        }
    }

    /// Gate a batch, dropping blocked entries and annotating the survivors.
    /// Survivors keep their input order.
    pub fn filter_candidates<T, I>(&self, candidates: I) -> Vec<Gated<T>>
    where
        T: ProposesAction,
        I: IntoIterator<Item = T>,
    {
        candidates
            .into_iter()
            .filter_map(|item| {
                let check = self.check(item.action().unwrap_or_default());
                check.permitted.then_some(Gated { item, check })
            })
            .collect()
    }
}
