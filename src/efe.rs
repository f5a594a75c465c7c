use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::math::{cosine_similarity, shannon_entropy_bits};
use crate::prior::{Gated, PriorCheck, PriorHierarchy, ProposesAction};

/// A thought or policy proposed by the reasoning layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub vector: Vec<f64>,
    #[serde(default)]
    pub probabilities: Vec<f64>,
    /// Optional self-causation score from the agency detector.
    #[serde(default)]
    pub agency_score: Option<f64>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, vector: Vec<f64>, probabilities: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            action: None,
            vector,
            probabilities,
            agency_score: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_agency(mut self, score: f64) -> Self {
        self.agency_score = Some(score);
        self
    }
}

impl ProposesAction for Candidate {
    fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }
}

/// Per-candidate score breakdown. Lower `efe` is preferred.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfeScore {
    pub id: String,
    pub uncertainty: f64,
    pub goal_divergence: f64,
    pub efe: f64,
    /// Effective precision assigned by the prior gate, when one ran.
    pub precision: Option<f64>,
    pub warnings: Vec<String>,
}

/// Winner of a selection round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "id")]
pub enum Dominant {
    Selected(String),
    /// No candidates were offered.
    None,
    /// Every candidate was blocked by the prior hierarchy.
    BlockedByPriors,
}

impl Dominant {
    pub fn id(&self) -> Option<&str> {
        match self {
            Dominant::Selected(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Dominant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dominant::Selected(id) => f.write_str(id),
            Dominant::None => f.write_str("none"),
            Dominant::BlockedByPriors => f.write_str("blocked_by_priors"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub dominant: Dominant,
    /// Scores of every candidate that reached scoring, in input order.
    pub scores: Vec<EfeScore>,
}

impl Selection {
    pub fn score_of(&self, id: &str) -> Option<&EfeScore> {
        self.scores.iter().find(|s| s.id == id)
    }
}

/// Expected-free-energy scorer.
///
/// `efe = exploration_constant * uncertainty + goal_divergence
///        - agency_weight * agency_score`, floored at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct EfeScorer {
    agency_weight: f64,
    exploration_constant: f64,
}

impl Default for EfeScorer {
    fn default() -> Self {
        Self {
            agency_weight: 0.0,
            exploration_constant: 1.0,
        }
    }
}

impl EfeScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weight of the agency reduction. Negative values are treated as zero.
    pub fn agency_weight(mut self, weight: f64) -> Self {
        self.agency_weight = weight.max(0.0);
        self
    }

    /// Multiplier on the uncertainty term.
    pub fn exploration_constant(mut self, c: f64) -> Self {
        self.exploration_constant = c.max(0.0);
        self
    }

    /// Score a single candidate against `goal`.
    pub fn score(&self, candidate: &Candidate, goal: &[f64]) -> EfeScore {
        let uncertainty = shannon_entropy_bits(&candidate.probabilities);
        let goal_divergence = match cosine_similarity(&candidate.vector, goal) {
            Some(sim) => 1.0 - sim,
            None => {
                if candidate.vector.len() != goal.len() {
                    warn!(
                        id = %candidate.id,
                        candidate = candidate.vector.len(),
                        goal = goal.len(),
                        "candidate and goal dimensions differ"
                    );
                }
                1.0
            }
        };
        let agency = candidate.agency_score.unwrap_or(0.0).max(0.0);
        let efe = (self.exploration_constant * uncertainty + goal_divergence
            - self.agency_weight * agency)
            .max(0.0);
        trace!(id = %candidate.id, uncertainty, goal_divergence, efe, "scored candidate");
        EfeScore {
            id: candidate.id.clone(),
            uncertainty,
            goal_divergence,
            efe,
            precision: None,
            warnings: Vec::new(),
        }
    }

    /// Pick the minimum-EFE candidate. Ties go to the earliest candidate.
    ///
    /// With `priors`, candidates are gated first; if all are blocked the
    /// result is [`Dominant::BlockedByPriors`].
    pub fn select_dominant(
        &self,
        candidates: &[Candidate],
        goal: &[f64],
        priors: Option<&PriorHierarchy>,
    ) -> Selection {
        if candidates.is_empty() {
            return Selection {
                dominant: Dominant::None,
                scores: Vec::new(),
            };
        }

        let gated: Vec<Gated<&Candidate>> = match priors {
            Some(priors) => {
                let survivors = priors.filter_candidates(candidates);
                if survivors.is_empty() {
                    debug!(count = candidates.len(), "all candidates blocked by priors");
                    return Selection {
                        dominant: Dominant::BlockedByPriors,
                        scores: Vec::new(),
                    };
                }
                survivors
            }
            None => candidates
                .iter()
                .map(|item| Gated {
                    item,
                    check: ungated(),
                })
                .collect(),
        };

        let scores: Vec<EfeScore> = gated
            .into_iter()
            .map(|g| {
                let mut score = self.score(g.item, goal);
                if priors.is_some() {
                    score.precision = Some(g.check.effective_precision);
                    score.warnings = g.check.warnings;
                }
                score
            })
            .collect();

        let mut best: Option<&EfeScore> = None;
        for score in &scores {
            if best.is_none_or(|b| score.efe < b.efe) {
                best = Some(score);
            }
        }
        let dominant = best
            .map(|s| Dominant::Selected(s.id.clone()))
            .unwrap_or(Dominant::None);
        debug!(%dominant, scored = scores.len(), "dominant candidate selected");
        Selection { dominant, scores }
    }
}

impl ProposesAction for &Candidate {
    fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }
}

fn ungated() -> PriorCheck {
    PriorCheck {
        permitted: true,
        blocked_by: None,
        blocking_level: None,
        reason: None,
        warnings: Vec::new(),
        effective_precision: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::{ConstraintKind, PriorConstraint, PriorLevel};

    fn goal() -> Vec<f64> {
        vec![1.0, 0.0]
    }

    #[test]
    fn score_combines_entropy_and_divergence() {
        let scorer = EfeScorer::new();
        let c = Candidate::new("a", vec![0.0, 1.0], vec![0.25, 0.25, 0.25, 0.25]);
        let s = scorer.score(&c, &goal());
        assert!((s.uncertainty - 2.0).abs() < 1e-12);
        assert!((s.goal_divergence - 1.0).abs() < 1e-12);
        assert!((s.efe - 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_vector_is_maximally_divergent() {
        let s = EfeScorer::new().score(&Candidate::new("z", vec![0.0, 0.0], vec![1.0]), &goal());
        assert_eq!(s.goal_divergence, 1.0);
        let s = EfeScorer::new().score(&Candidate::new("z", vec![1.0, 0.0], vec![1.0]), &[0.0, 0.0]);
        assert_eq!(s.goal_divergence, 1.0);
    }

    #[test]
    fn lower_entropy_wins() {
        let scorer = EfeScorer::new();
        let candidates = vec![
            Candidate::new("vague", vec![1.0, 0.0], vec![0.5, 0.5]),
            Candidate::new("sharp", vec![1.0, 0.0], vec![0.9, 0.1]),
        ];
        let sel = scorer.select_dominant(&candidates, &goal(), None);
        assert_eq!(sel.dominant, Dominant::Selected("sharp".into()));
        assert!(sel.score_of("sharp").unwrap().efe < sel.score_of("vague").unwrap().efe);
    }

    #[test]
    fn ties_go_to_first_seen() {
        let c = Candidate::new("first", vec![1.0, 0.0], vec![0.5, 0.5]);
        let mut d = c.clone();
        d.id = "second".into();
        let sel = EfeScorer::new().select_dominant(&[c, d], &goal(), None);
        assert_eq!(sel.dominant.id(), Some("first"));
    }

    #[test]
    fn agency_reduces_but_never_below_zero() {
        let scorer = EfeScorer::new().agency_weight(5.0);
        let c = Candidate::new("a", vec![1.0, 0.0], vec![0.5, 0.5]).with_agency(1.0);
        assert_eq!(scorer.score(&c, &goal()).efe, 0.0);

        let scorer = EfeScorer::new().agency_weight(0.5);
        let s = scorer.score(&c, &goal());
        assert!((s.efe - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sentinels_for_empty_and_blocked() {
        let scorer = EfeScorer::new();
        let sel = scorer.select_dominant(&[], &goal(), None);
        assert_eq!(sel.dominant.to_string(), "none");

        let priors = PriorHierarchy::new("a").with(
            PriorConstraint::new("no-rm", PriorLevel::Basal, ConstraintKind::Prohibit, "rm -rf")
                .unwrap(),
        );
        let blocked = vec![
            Candidate::new("x", vec![1.0, 0.0], vec![1.0]).with_action("rm -rf /"),
            Candidate::new("y", vec![1.0, 0.0], vec![1.0]).with_action("RM -RF ~"),
        ];
        let sel = scorer.select_dominant(&blocked, &goal(), Some(&priors));
        assert_eq!(sel.dominant, Dominant::BlockedByPriors);
        assert_eq!(sel.dominant.to_string(), "blocked_by_priors");
        assert!(sel.scores.is_empty());
    }

    #[test]
    fn blocked_candidates_are_not_scored() {
        let priors = PriorHierarchy::new("a").with(
            PriorConstraint::new("no-rm", PriorLevel::Basal, ConstraintKind::Prohibit, "rm -rf")
                .unwrap(),
        );
        let candidates = vec![
            Candidate::new("best", vec![1.0, 0.0], vec![1.0]).with_action("rm -rf /"),
            Candidate::new("ok", vec![0.5, 0.5], vec![0.5, 0.5]).with_action("ls"),
        ];
        let sel = EfeScorer::new().select_dominant(&candidates, &goal(), Some(&priors));
        assert_eq!(sel.dominant.id(), Some("ok"));
        assert_eq!(sel.scores.len(), 1);
        assert_eq!(sel.scores[0].precision, Some(1.0));
    }
}
