//! Decision and bounded working-memory engine for an agent's
//! perceive, reason and decide loop.
//!
//! Candidates are gated by a three-tier [`PriorHierarchy`], ranked by
//! expected free energy, tagged with agency and particle structure, and the
//! winner is remembered in a token-bounded [`TokenBudgetManager`]. Lossy
//! rewrites of memory are logged by the [`ResidueTracker`].
//!
//! All computation is synchronous. Only the optional persistence queue runs
//! in the background.

pub mod agency;
pub mod belief;
pub mod blanket;
pub mod config;
pub mod efe;
pub mod engine;
pub mod epistemic;
pub mod error;
pub mod logging;
pub mod math;
pub mod particle;
pub mod persistence;
pub mod prior;
pub mod residue;
pub mod session;
pub mod working_memory;

pub use agency::{AgencyAttribution, AgencyCategory, AgencyDetector};
pub use belief::BeliefState;
pub use blanket::{MarkovBlanketPartition, Overlap, Region};
pub use config::EngineConfig;
pub use efe::{Candidate, Dominant, EfeScore, EfeScorer, Selection};
pub use engine::{Consolidation, CycleInput, CycleOutcome, DecisionEngine};
pub use epistemic::{EpistemicGainDetector, EpistemicGainEvent};
pub use error::{CognitiveCoreViolation, Error, Result, ValidationError};
pub use logging::{LogLevel, init_tracing};
pub use particle::{ParticleClassification, ParticleClassifier, ParticleType};
pub use persistence::{CellRecord, CellSink, InMemorySink, PersistenceQueue};
pub use prior::{ConstraintKind, PriorCheck, PriorConstraint, PriorHierarchy, PriorLevel};
pub use residue::{ResidueTracker, SymbolicResidue, TransformationType};
pub use session::{AgentRegistry, Modulation};
pub use working_memory::{CellPriority, ContextCell, PackagedContext, TokenBudgetManager};
