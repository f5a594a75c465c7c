use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::math::cosine_similarity;
use crate::persistence::{CellRecord, PersistenceHandle};

const PRIORITY_WEIGHT: f64 = 0.4;
const RESONANCE_WEIGHT: f64 = 0.3;
const STRENGTH_WEIGHT: f64 = 0.3;
const REINFORCEMENT: f64 = 0.1;
const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellPriority {
    Critical,
    High,
    Medium,
    Low,
    Ephemeral,
}

impl CellPriority {
    pub fn weight(self) -> f64 {
        match self {
            CellPriority::Critical => 1.0,
            CellPriority::High => 0.8,
            CellPriority::Medium => 0.5,
            CellPriority::Low => 0.2,
            CellPriority::Ephemeral => 0.1,
        }
    }
}

/// Rough token count for `text`: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Unit of content held in working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCell {
    pub id: String,
    pub content: String,
    pub priority: CellPriority,
    pub token_count: usize,
    /// Similarity to the current goal, in `[0, 1]`.
    pub resonance_score: f64,
    /// In `[0, 1]`; decays over time and grows on access.
    pub attractor_strength: f64,
    pub basin_id: Option<String>,
    pub causal_links: Vec<String>,
    pub derived_cells: Vec<String>,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl ContextCell {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        priority: CellPriority,
        token_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            content: content.into(),
            priority,
            token_count,
            resonance_score: NEUTRAL_SCORE,
            attractor_strength: NEUTRAL_SCORE,
            basin_id: None,
            causal_links: Vec::new(),
            derived_cells: Vec::new(),
            access_count: 0,
            created_at: now,
            last_accessed: now,
        }
    }

    /// Cell with a fresh id and an estimated token count.
    pub fn from_text(content: impl Into<String>, priority: CellPriority) -> Self {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        Self::new(Uuid::new_v4().to_string(), content, priority, tokens)
    }

    pub fn with_resonance(mut self, score: f64) -> Self {
        self.resonance_score = unit(score);
        self
    }

    pub fn with_attractor_strength(mut self, strength: f64) -> Self {
        self.attractor_strength = unit(strength);
        self
    }

    pub fn with_basin(mut self, basin: impl Into<String>) -> Self {
        self.basin_id = Some(basin.into());
        self
    }

    /// Record that this cell was caused by `cause`.
    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.causal_links.push(cause.into());
        self
    }

    /// `0.4 * priority + 0.3 * resonance + 0.3 * attractor strength`.
    pub fn effective_priority(&self) -> f64 {
        PRIORITY_WEIGHT * self.priority.weight()
            + RESONANCE_WEIGHT * self.resonance_score
            + STRENGTH_WEIGHT * self.attractor_strength
    }
}

fn unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub admitted: bool,
    /// Cells removed to make room, lowest effective priority first.
    pub evicted: Vec<ContextCell>,
}

impl Admission {
    fn rejected() -> Self {
        Self {
            admitted: false,
            evicted: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageMetadata {
    pub tokens_used: usize,
    pub token_limit: usize,
    pub cells_included: Vec<String>,
    pub cells_excluded: Vec<String>,
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackagedContext {
    pub content: String,
    pub metadata: PackageMetadata,
}

/// Token-bounded working memory.
///
/// A fraction of the total budget is held in reserve. When a new cell does
/// not fit, cells of strictly lower effective priority are evicted, lowest
/// first, but only if doing so frees enough room; otherwise nothing changes.
///
/// The manager is plain mutable state. Hosts that share it across threads
/// wrap it in a mutex.
pub struct TokenBudgetManager {
    total_budget: usize,
    reserve_ratio: f64,
    cells: IndexMap<String, ContextCell>,
    persistence: Option<PersistenceHandle>,
    persist_threshold: f64,
}

impl TokenBudgetManager {
    /// Create a manager. `reserve_ratio` is clamped to `[0, 1]`.
    pub fn new(total_budget: usize, reserve_ratio: f64) -> Self {
        Self {
            total_budget,
            reserve_ratio: unit(reserve_ratio),
            cells: IndexMap::new(),
            persistence: None,
            persist_threshold: 1.0,
        }
    }

    /// Hand admitted cells whose resonance reaches `threshold` to a
    /// persistence queue. The hand-off never blocks.
    pub fn with_persistence(mut self, handle: PersistenceHandle, threshold: f64) -> Self {
        self.set_persistence(handle, threshold);
        self
    }

    pub fn set_persistence(&mut self, handle: PersistenceHandle, threshold: f64) {
        self.persistence = Some(handle);
        self.persist_threshold = unit(threshold);
    }

    pub fn total_budget(&self) -> usize {
        self.total_budget
    }

    /// Budget left after the reserve.
    pub fn usable_budget(&self) -> usize {
        let reserve = (self.total_budget as f64 * self.reserve_ratio).round() as usize;
        self.total_budget.saturating_sub(reserve)
    }

    pub fn used_tokens(&self) -> usize {
        self.cells.values().map(|c| c.token_count).sum()
    }

    pub fn available_tokens(&self) -> usize {
        self.usable_budget().saturating_sub(self.used_tokens())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ContextCell> {
        self.cells.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cells.contains_key(id)
    }

    /// Cells in insertion order.
    pub fn cells(&self) -> impl Iterator<Item = &ContextCell> {
        self.cells.values()
    }

    pub fn admit(&mut self, cell: ContextCell) -> bool {
        self.admit_with_evictions(cell).admitted
    }

    /// Admit `cell`, evicting lower-priority cells if needed.
    ///
    /// A cell whose id is already present replaces the existing one in place.
    pub fn admit_with_evictions(&mut self, cell: ContextCell) -> Admission {
        let usable = self.usable_budget();
        if cell.token_count > usable {
            debug!(id = %cell.id, tokens = cell.token_count, usable, "cell exceeds usable budget");
            return Admission::rejected();
        }

        let replaced = self.cells.get(&cell.id).map_or(0, |c| c.token_count);
        let free = usable.saturating_sub(self.used_tokens() - replaced);
        if cell.token_count <= free {
            self.insert(cell);
            return Admission {
                admitted: true,
                evicted: Vec::new(),
            };
        }

        let needed = cell.token_count - free;
        let incoming = cell.effective_priority();
        let mut candidates: Vec<(&String, f64, usize)> = self
            .cells
            .iter()
            .filter(|(id, _)| **id != cell.id)
            .map(|(id, c)| (id, c.effective_priority(), c.token_count))
            .filter(|(_, priority, _)| *priority < incoming)
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut freed = 0;
        let mut victims = Vec::new();
        for (id, _, tokens) in candidates {
            if freed >= needed {
                break;
            }
            freed += tokens;
            victims.push(id.clone());
        }
        if freed < needed {
            debug!(id = %cell.id, needed, freed, "not enough evictable cells; admission refused");
            return Admission::rejected();
        }

        let evicted: Vec<ContextCell> = victims
            .iter()
            .filter_map(|id| self.cells.shift_remove(id))
            .collect();
        debug!(id = %cell.id, evicted = evicted.len(), freed, "evicted cells for admission");
        self.insert(cell);
        Admission {
            admitted: true,
            evicted,
        }
    }

    fn insert(&mut self, cell: ContextCell) {
        trace!(id = %cell.id, tokens = cell.token_count, "cell admitted");
        if let Some(queue) = &self.persistence {
            if cell.resonance_score >= self.persist_threshold {
                queue.send(CellRecord::from(&cell));
            }
        }
        self.cells.insert(cell.id.clone(), cell);
    }

    /// Remove a cell explicitly.
    pub fn evict(&mut self, id: &str) -> Option<ContextCell> {
        self.cells.shift_remove(id)
    }

    /// Insertion position of `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.cells.get_index_of(id)
    }

    /// Put a previously removed cell back at `index` without a budget check
    /// or a persistence hand-off.
    pub(crate) fn restore(&mut self, index: usize, cell: ContextCell) {
        let index = index.min(self.cells.len());
        trace!(id = %cell.id, index, "cell restored");
        self.cells.shift_insert(index, cell.id.clone(), cell);
    }

    /// Multiply every attractor strength by `1 - rate`.
    pub fn decay(&mut self, rate: f64) {
        let keep = 1.0 - unit(rate);
        for cell in self.cells.values_mut() {
            cell.attractor_strength = (cell.attractor_strength * keep).max(0.0);
        }
    }

    /// Reinforce a cell on access. Returns `false` for unknown ids.
    pub fn touch(&mut self, id: &str) -> bool {
        let Some(cell) = self.cells.get_mut(id) else {
            return false;
        };
        cell.attractor_strength = (cell.attractor_strength + REINFORCEMENT).min(1.0);
        cell.access_count += 1;
        cell.last_accessed = Utc::now();
        true
    }

    /// Recompute resonance as the cosine similarity between each cell's
    /// embedding and the goal, floored at zero. Cells without an embedding
    /// keep their score. Returns the number of cells updated.
    pub fn update_resonance(
        &mut self,
        goal_embedding: &[f64],
        embeddings: &HashMap<String, Vec<f64>>,
    ) -> usize {
        let mut updated = 0;
        for (id, cell) in self.cells.iter_mut() {
            let Some(embedding) = embeddings.get(id) else {
                continue;
            };
            cell.resonance_score =
                cosine_similarity(embedding, goal_embedding).map_or(0.0, |s| s.clamp(0.0, 1.0));
            updated += 1;
        }
        updated
    }

    /// Greedily pack cells by descending effective priority into
    /// `max_tokens` (the usable budget by default). Ties keep insertion
    /// order. Cells that do not fit are skipped and reported.
    pub fn package(&self, max_tokens: Option<usize>) -> PackagedContext {
        let limit = max_tokens.unwrap_or_else(|| self.usable_budget());
        let mut ordered: Vec<&ContextCell> = self.cells.values().collect();
        ordered.sort_by(|a, b| b.effective_priority().total_cmp(&a.effective_priority()));

        let mut used = 0;
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut parts = Vec::new();
        for cell in ordered {
            if used + cell.token_count <= limit {
                used += cell.token_count;
                included.push(cell.id.clone());
                parts.push(cell.content.as_str());
            } else {
                excluded.push(cell.id.clone());
            }
        }
        let utilization = if limit == 0 {
            0.0
        } else {
            used as f64 / limit as f64
        };
        debug!(used, limit, included = included.len(), excluded = excluded.len(), "context packaged");
        PackagedContext {
            content: parts.join("\n\n"),
            metadata: PackageMetadata {
                tokens_used: used,
                token_limit: limit,
                cells_included: included,
                cells_excluded: excluded,
                utilization,
            },
        }
    }
}
