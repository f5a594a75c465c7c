use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blanket::MarkovBlanketPartition;
use crate::error::CognitiveCoreViolation;

/// Default ceiling on estimated nesting depth.
pub const MAX_NESTING_DEPTH: usize = 5;

const INVALID_PARTITION_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticleType {
    Cognitive,
    PassiveMetacognitive,
    ActiveMetacognitive,
    StrangeMetacognitive,
    NestedNLevel,
}

impl fmt::Display for ParticleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticleType::Cognitive => "COGNITIVE",
            ParticleType::PassiveMetacognitive => "PASSIVE_METACOGNITIVE",
            ParticleType::ActiveMetacognitive => "ACTIVE_METACOGNITIVE",
            ParticleType::StrangeMetacognitive => "STRANGE_METACOGNITIVE",
            ParticleType::NestedNLevel => "NESTED_N_LEVEL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticleClassification {
    pub particle_type: ParticleType,
    pub confidence: f64,
    pub nesting_level: usize,
    pub has_agency: bool,
    pub valid_partition: bool,
}

/// Whether internal, sensory and external paths all exist.
pub fn has_belief_mapping(p: &MarkovBlanketPartition) -> bool {
    !p.internal.is_empty() && !p.sensory.is_empty() && !p.external.is_empty()
}

/// At least two internal paths, shielded by both sensory and active paths.
pub fn has_internal_blanket(p: &MarkovBlanketPartition) -> bool {
    p.internal.len() >= 2 && !p.sensory.is_empty() && !p.active.is_empty()
}

/// Whether active paths feed back into internal ones.
///
/// Path names are the only topology available, so an active path mentioning
/// "internal" or an internal path id counts as a link. Without such a hint the
/// coupling is assumed whenever both sets exist.
pub fn has_active_internal_coupling(p: &MarkovBlanketPartition) -> bool {
    if p.active.is_empty() {
        return false;
    }
    let named_link = p.active.iter().any(|a| {
        let a = a.to_lowercase();
        a.contains("internal") || mentions_any(&a, &p.internal)
    });
    named_link || !p.internal.is_empty()
}

/// Active paths that all point outward: every active id looks external.
pub fn is_strange_configuration(p: &MarkovBlanketPartition) -> bool {
    !p.active.is_empty() && p.active.iter().all(|a| looks_external(a, p))
}

fn looks_external(path: &str, p: &MarkovBlanketPartition) -> bool {
    let lower = path.to_lowercase();
    lower.contains("external")
        || lower.contains("environment")
        || mentions_any(&lower, &p.external)
}

/// Whether `lowered` contains any non-empty id from `ids`, ignoring case.
fn mentions_any<'a>(lowered: &str, ids: impl IntoIterator<Item = &'a String>) -> bool {
    ids.into_iter()
        .filter(|id| !id.is_empty())
        .any(|id| lowered.contains(&id.to_lowercase()))
}

/// Nesting depth implied by the number of internal paths.
pub fn estimate_nesting_depth(internal_paths: usize) -> usize {
    match internal_paths {
        0..=1 => 0,
        2..=3 => 1,
        4..=6 => 2,
        n => n / 2,
    }
}

/// Classifies the self-referential shape of a cognitive unit from its
/// boundary partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleClassifier {
    max_nesting_depth: usize,
}

impl Default for ParticleClassifier {
    fn default() -> Self {
        Self {
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl ParticleClassifier {
    pub fn new(max_nesting_depth: usize) -> Self {
        Self { max_nesting_depth }
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }

    /// Walk the structural predicates in order and stop at the first that
    /// fails.
    ///
    /// An overlapping partition lowers confidence but is still classified.
    ///
    /// # Errors
    ///
    /// Returns [`CognitiveCoreViolation`] when the estimated nesting depth
    /// exceeds the configured maximum.
    pub fn classify(
        &self,
        partition: &MarkovBlanketPartition,
    ) -> Result<ParticleClassification, CognitiveCoreViolation> {
        let valid_partition = partition.is_valid_partition();
        let mut confidence = 1.0;
        if !valid_partition {
            warn!(
                overlaps = partition.get_overlaps().len(),
                "classifying overlapping partition"
            );
            confidence *= INVALID_PARTITION_FACTOR;
        }

        let (particle_type, factor, nesting_level) = if !has_belief_mapping(partition) {
            (ParticleType::Cognitive, 0.5, 0)
        } else if !has_internal_blanket(partition) {
            (ParticleType::Cognitive, 0.9, 0)
        } else if !has_active_internal_coupling(partition) {
            (ParticleType::PassiveMetacognitive, 0.85, 0)
        } else if is_strange_configuration(partition) {
            (ParticleType::StrangeMetacognitive, 0.8, 0)
        } else {
            let depth = estimate_nesting_depth(partition.internal.len());
            if depth > self.max_nesting_depth {
                warn!(depth, max = self.max_nesting_depth, "nesting depth exceeds maximum");
                return Err(CognitiveCoreViolation {
                    depth,
                    max: self.max_nesting_depth,
                });
            }
            if depth > 1 {
                (ParticleType::NestedNLevel, 0.9, depth)
            } else {
                (ParticleType::ActiveMetacognitive, 0.95, depth)
            }
        };

        let has_agency = match particle_type {
            ParticleType::Cognitive | ParticleType::PassiveMetacognitive => false,
            _ => !partition.active.is_empty() && !partition.internal.is_empty(),
        };
        let confidence = (confidence * factor).clamp(0.0, 1.0);
        debug!(%particle_type, confidence, nesting_level, has_agency, "particle classified");
        Ok(ParticleClassification {
            particle_type,
            confidence,
            nesting_level,
            has_agency,
            valid_partition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("mu{i}")).collect()
    }

    #[test]
    fn no_active_paths_means_no_agency() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], Vec::<String>::new(), ["a", "b"]);
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert!(matches!(
            c.particle_type,
            ParticleType::Cognitive | ParticleType::PassiveMetacognitive
        ));
        assert!(!c.has_agency);
        assert!((c.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn missing_belief_mapping_halves_confidence() {
        let p = MarkovBlanketPartition::new(
            Vec::<String>::new(),
            Vec::<String>::new(),
            Vec::<String>::new(),
            ["a", "b"],
        );
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert_eq!(c.particle_type, ParticleType::Cognitive);
        assert!((c.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn active_metacognitive_for_shallow_unit() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], ["act"], internal(2));
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert_eq!(c.particle_type, ParticleType::ActiveMetacognitive);
        assert_eq!(c.nesting_level, 1);
        assert!(c.has_agency);
        assert!((c.confidence - 0.95).abs() < 1e-12);
    }

    #[test]
    fn deeper_units_are_nested() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], ["act"], internal(5));
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert_eq!(c.particle_type, ParticleType::NestedNLevel);
        assert_eq!(c.nesting_level, 2);
        assert!((c.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn outward_active_paths_are_strange() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], ["push_external"], internal(2));
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert_eq!(c.particle_type, ParticleType::StrangeMetacognitive);
        assert!(c.has_agency);
        assert!((c.confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn excessive_depth_is_a_violation() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], ["act"], internal(14));
        let err = ParticleClassifier::new(5).classify(&p).unwrap_err();
        assert_eq!(err, CognitiveCoreViolation { depth: 7, max: 5 });
        assert!(ParticleClassifier::new(7).classify(&p).is_ok());
    }

    #[test]
    fn overlapping_partition_lowers_confidence() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], ["act"], ["mu0", "mu1", "s"]);
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert!(!c.valid_partition);
        assert_eq!(c.particle_type, ParticleType::ActiveMetacognitive);
        assert!((c.confidence - 0.7 * 0.95).abs() < 1e-12);
    }

    #[test]
    fn depth_estimate_table() {
        let got: Vec<usize> = [0, 1, 2, 3, 4, 6, 7, 10]
            .into_iter()
            .map(estimate_nesting_depth)
            .collect();
        assert_eq!(got, vec![0, 0, 1, 1, 2, 2, 3, 5]);
    }

    #[test]
    fn empty_ids_do_not_match_every_path() {
        let p = MarkovBlanketPartition::new(["world", ""], ["s"], ["hand"], internal(2));
        assert!(!is_strange_configuration(&p));
        let c = ParticleClassifier::default().classify(&p).unwrap();
        assert_eq!(c.particle_type, ParticleType::ActiveMetacognitive);

        let p = MarkovBlanketPartition::new(["world"], ["s"], ["hand"], ["", "mu"]);
        assert!(!is_strange_configuration(&p));
        assert!(!mentions_any("hand", &p.internal));
        assert!(mentions_any("reach_world", &p.external));
    }

    #[test]
    fn coupling_requires_active_paths() {
        let p = MarkovBlanketPartition::new(["eta"], ["s"], Vec::<String>::new(), ["m"]);
        assert!(!has_active_internal_coupling(&p));
    }
}
