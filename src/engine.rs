use serde::Serialize;
use tracing::{debug, info};

use crate::agency::{AgencyAttribution, AgencyDetector};
use crate::belief::BeliefState;
use crate::blanket::MarkovBlanketPartition;
use crate::config::EngineConfig;
use crate::efe::{Candidate, EfeScorer, Selection};
use crate::epistemic::{EpistemicGainDetector, EpistemicGainEvent};
use crate::error::{Result, ValidationError};
use crate::particle::{ParticleClassification, ParticleClassifier};
use crate::persistence::{CellSink, PersistenceQueue};
use crate::prior::PriorHierarchy;
use crate::residue::{ResidueTracker, SymbolicResidue, TransformationType};
use crate::session::{AgentRegistry, AgentState, Modulation};
use crate::working_memory::{CellPriority, ContextCell, PackagedContext, TokenBudgetManager};

/// Everything one decision cycle looks at.
#[derive(Debug, Clone, Default)]
pub struct CycleInput {
    pub candidates: Vec<Candidate>,
    pub goal: Vec<f64>,
    pub partition: Option<MarkovBlanketPartition>,
    /// `(internal, active)` samples used to tag candidates with an agency
    /// score.
    pub agency_samples: Option<(Vec<Vec<f64>>, Vec<Vec<f64>>)>,
    /// `(prior, posterior)` beliefs from the perception layer.
    pub belief_update: Option<(BeliefState, BeliefState)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub selection: Selection,
    pub classification: Option<ParticleClassification>,
    pub agency: Option<AgencyAttribution>,
    pub gain: Option<EpistemicGainEvent>,
    /// Id of the working-memory cell holding the winner, if it was admitted.
    pub admitted: Option<String>,
    /// Cells pushed out to make room, each linked forward to the winner.
    pub evicted: Vec<ContextCell>,
}

/// Result of replacing working-memory cells with a summary.
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub residue: SymbolicResidue,
    /// The replaced cells, linked forward to the summary.
    pub sources: Vec<ContextCell>,
    /// Other cells evicted to make room for the summary.
    pub evicted: Vec<ContextCell>,
}

/// One agent's decision loop: gate, score, classify, measure gain, and
/// remember the winner in bounded working memory.
pub struct DecisionEngine {
    priors: PriorHierarchy,
    scorer: EfeScorer,
    classifier: ParticleClassifier,
    agency: AgencyDetector,
    gain: EpistemicGainDetector,
    memory: TokenBudgetManager,
    residues: ResidueTracker,
    registry: AgentRegistry,
    persist_threshold: f64,
    queue_capacity: usize,
    queue: Option<PersistenceQueue>,
}

impl DecisionEngine {
    /// Build an engine for `agent_id` from validated settings.
    pub fn from_config(agent_id: impl Into<String>, cfg: &EngineConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            priors: cfg.prior_hierarchy(agent_id)?,
            scorer: cfg.efe_scorer(),
            classifier: cfg.particle_classifier(),
            agency: cfg.agency_detector(),
            gain: cfg.gain_detector(),
            memory: cfg.budget_manager(),
            residues: ResidueTracker::new(),
            registry: AgentRegistry::new(),
            persist_threshold: cfg.memory.persist_resonance_threshold,
            queue_capacity: cfg.memory.persistence_queue_capacity,
            queue: None,
        })
    }

    /// Engine with default settings and no constraints.
    pub fn new(agent_id: impl Into<String>) -> Self {
        let cfg = EngineConfig::default();
        Self {
            priors: PriorHierarchy::new(agent_id),
            scorer: cfg.efe_scorer(),
            classifier: cfg.particle_classifier(),
            agency: cfg.agency_detector(),
            gain: cfg.gain_detector(),
            memory: cfg.budget_manager(),
            residues: ResidueTracker::new(),
            registry: AgentRegistry::new(),
            persist_threshold: cfg.memory.persist_resonance_threshold,
            queue_capacity: cfg.memory.persistence_queue_capacity,
            queue: None,
        }
    }

    /// Persist high-resonance admissions to `sink` in the background.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_persistence<S>(mut self, sink: S) -> Self
    where
        S: CellSink + 'static,
    {
        let queue = PersistenceQueue::spawn(sink, self.queue_capacity);
        self.memory
            .set_persistence(queue.handle(), self.persist_threshold);
        self.queue = Some(queue);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.priors.agent_id
    }

    pub fn priors(&self) -> &PriorHierarchy {
        &self.priors
    }

    pub fn priors_mut(&mut self) -> &mut PriorHierarchy {
        &mut self.priors
    }

    pub fn memory(&self) -> &TokenBudgetManager {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut TokenBudgetManager {
        &mut self.memory
    }

    pub fn residues(&self) -> &ResidueTracker {
        &self.residues
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run one cycle.
    ///
    /// Fallible steps run before working memory is touched, so an error
    /// leaves the engine unchanged apart from gain history.
    ///
    /// # Errors
    ///
    /// Agency samples of mismatched shape and partitions nested deeper than
    /// the configured maximum abort the cycle.
    pub fn cycle(&mut self, input: CycleInput) -> Result<CycleOutcome> {
        let CycleInput {
            mut candidates,
            goal,
            partition,
            agency_samples,
            belief_update,
        } = input;

        let agency = match &agency_samples {
            Some((internal, active)) => Some(self.agency.attribute(internal, active)?),
            None => None,
        };
        if let Some(attribution) = &agency {
            for candidate in candidates.iter_mut().filter(|c| c.agency_score.is_none()) {
                candidate.agency_score = Some(attribution.score);
            }
        }

        let classification = match &partition {
            Some(p) => Some(self.classifier.classify(p)?),
            None => None,
        };

        let selection = self
            .scorer
            .select_dominant(&candidates, &goal, Some(&self.priors));

        let gain = belief_update
            .as_ref()
            .and_then(|(prior, posterior)| self.gain.check(prior, posterior, None));

        let mut admitted = None;
        let mut evicted = Vec::new();
        let winner = selection
            .dominant
            .id()
            .and_then(|id| candidates.iter().find(|c| c.id == id));
        if let (Some(candidate), Some(score)) = (
            winner,
            selection.dominant.id().and_then(|id| selection.score_of(id)),
        ) {
            let priority = if gain.is_some() {
                CellPriority::High
            } else {
                CellPriority::Medium
            };
            let content = candidate.action.clone().unwrap_or_else(|| candidate.id.clone());
            let cell = ContextCell::from_text(content, priority)
                .with_resonance(1.0 - score.goal_divergence)
                .caused_by(candidate.id.clone());
            let cell = match &classification {
                Some(c) => cell.with_basin(c.particle_type.to_string()),
                None => cell,
            };

            let admission = self.memory.admit_with_evictions(cell.clone());
            if admission.admitted {
                evicted = admission.evicted;
                self.record_evictions(&mut evicted, &cell);
                admitted = Some(cell.id);
            } else {
                debug!(candidate = %candidate.id, "winner not admitted to working memory");
            }
        }

        info!(
            agent = %self.priors.agent_id,
            dominant = %selection.dominant,
            gain = gain.is_some(),
            admitted = admitted.is_some(),
            evicted = evicted.len(),
            "decision cycle complete"
        );
        Ok(CycleOutcome {
            selection,
            classification,
            agency,
            gain,
            admitted,
            evicted,
        })
    }

    /// Replace `source_ids` in working memory with a single summary cell.
    ///
    /// One source is a compression, several a merge. Cells evicted to make
    /// room are logged as eviction residues. Returns `None` and leaves memory
    /// as it was when a source is missing or the summary does not fit.
    pub fn consolidate(
        &mut self,
        source_ids: &[&str],
        summary: impl Into<String>,
        priority: CellPriority,
        lost_details: Vec<String>,
    ) -> Option<Consolidation> {
        if source_ids.is_empty() {
            return None;
        }
        let mut positions = Vec::with_capacity(source_ids.len());
        for id in source_ids {
            positions.push(self.memory.position(id)?);
        }
        let mut removed: Vec<(usize, ContextCell)> = positions
            .into_iter()
            .zip(source_ids)
            .filter_map(|(pos, id)| self.memory.evict(id).map(|c| (pos, c)))
            .collect();

        let mut derived = ContextCell::from_text(summary, priority);
        derived.causal_links = removed.iter().map(|(_, c)| c.id.clone()).collect();
        derived.resonance_score = removed
            .iter()
            .map(|(_, c)| c.resonance_score)
            .fold(0.0, f64::max);

        let admission = self.memory.admit_with_evictions(derived.clone());
        if !admission.admitted {
            debug!(sources = removed.len(), "summary does not fit; restoring sources");
            removed.sort_by_key(|(pos, _)| *pos);
            for (pos, cell) in removed {
                self.memory.restore(pos, cell);
            }
            return None;
        }

        let mut evicted = admission.evicted;
        self.record_evictions(&mut evicted, &derived);
        let mut sources: Vec<ContextCell> = removed.into_iter().map(|(_, c)| c).collect();
        let transformation = if sources.len() == 1 {
            TransformationType::Compression
        } else {
            TransformationType::Merge
        };
        let residue = self
            .residues
            .record(&mut sources, &derived, transformation, lost_details)
            .clone();
        Some(Consolidation {
            residue,
            sources,
            evicted,
        })
    }

    fn record_evictions(&mut self, evicted: &mut [ContextCell], newcomer: &ContextCell) {
        for old in evicted.iter_mut() {
            let lost = vec![old.content.clone()];
            self.residues.record(
                std::slice::from_mut(old),
                newcomer,
                TransformationType::Eviction,
                lost,
            );
        }
    }

    pub fn attribution_chain(&self, cell_id: &str) -> Vec<String> {
        self.residues.attribution_chain(cell_id)
    }

    /// Package working memory for prompt construction.
    pub fn package(&self, max_tokens: Option<usize>) -> PackagedContext {
        self.memory.package(max_tokens)
    }

    /// Apply a modulation to this engine's agent. Precision changes also move
    /// the prior hierarchy's base precision.
    pub fn modulate(&mut self, modulation: Modulation) -> Result<&AgentState, ValidationError> {
        let agent_id = self.priors.agent_id.clone();
        let state = self.registry.apply(&agent_id, modulation)?;
        self.priors.set_base_precision(state.precision);
        Ok(state)
    }
}
