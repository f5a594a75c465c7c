use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::working_memory::ContextCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    Compression,
    Eviction,
    Merge,
}

/// Log entry for one lossy transformation. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolicResidue {
    pub id: Uuid,
    pub source_cell_ids: Vec<String>,
    pub derived_cell_id: String,
    pub transformation: TransformationType,
    pub lost_details: Vec<String>,
    /// `derived_tokens / sum(source_tokens)`, `0.0` for empty sources.
    pub compression_ratio: f64,
    /// Ancestry of the derived cell at recording time, itself first.
    pub attribution_chain: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Ratio of derived tokens to source tokens.
pub fn compression_ratio(source_tokens: usize, derived_tokens: usize) -> f64 {
    if source_tokens == 0 {
        0.0
    } else {
        derived_tokens as f64 / source_tokens as f64
    }
}

/// Append-only log of lossy transformations, indexed by derived cell.
#[derive(Debug, Default)]
pub struct ResidueTracker {
    residues: Vec<SymbolicResidue>,
    by_derived: HashMap<String, Vec<usize>>,
}

impl ResidueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `derived` was produced from `sources`, linking each source
    /// forward to it through `derived_cells`.
    pub fn record(
        &mut self,
        sources: &mut [ContextCell],
        derived: &ContextCell,
        transformation: TransformationType,
        lost_details: Vec<String>,
    ) -> &SymbolicResidue {
        let source_tokens: usize = sources.iter().map(|c| c.token_count).sum();
        let source_cell_ids: Vec<String> = sources.iter().map(|c| c.id.clone()).collect();
        let ratio = compression_ratio(source_tokens, derived.token_count);
        for source in sources.iter_mut() {
            if !source.derived_cells.contains(&derived.id) {
                source.derived_cells.push(derived.id.clone());
            }
        }

        let index = self.residues.len();
        self.by_derived
            .entry(derived.id.clone())
            .or_default()
            .push(index);
        let attribution_chain = self.attribution_chain_with(&derived.id, &source_cell_ids);

        debug!(
            derived = %derived.id,
            sources = source_cell_ids.len(),
            ?transformation,
            ratio,
            "residue recorded"
        );
        self.residues.push(SymbolicResidue {
            id: Uuid::new_v4(),
            source_cell_ids,
            derived_cell_id: derived.id.clone(),
            transformation,
            lost_details,
            compression_ratio: ratio,
            attribution_chain,
            recorded_at: Utc::now(),
        });
        &self.residues[index]
    }

    /// Every cell `cell_id` descends from, itself first, without duplicates.
    /// An untracked cell is its own sole ancestor.
    pub fn attribution_chain(&self, cell_id: &str) -> Vec<String> {
        self.attribution_chain_with(cell_id, &[])
    }

    fn attribution_chain_with(&self, cell_id: &str, extra_sources: &[String]) -> Vec<String> {
        let mut chain = vec![cell_id.to_string()];
        let mut seen: HashSet<String> = HashSet::from([cell_id.to_string()]);
        let mut queue: VecDeque<String> = extra_sources.iter().cloned().collect();
        queue.push_front(cell_id.to_string());
        let mut first = true;

        while let Some(current) = queue.pop_front() {
            if !first && !seen.insert(current.clone()) {
                continue;
            }
            if !first {
                chain.push(current.clone());
            }
            first = false;
            for &i in self.by_derived.get(&current).into_iter().flatten() {
                if let Some(residue) = self.residues.get(i) {
                    queue.extend(residue.source_cell_ids.iter().cloned());
                }
            }
        }
        chain
    }

    /// Residues whose derived cell is `cell_id`.
    pub fn residues_for(&self, cell_id: &str) -> Vec<&SymbolicResidue> {
        self.by_derived
            .get(cell_id)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.residues.get(i))
            .collect()
    }

    pub fn residues(&self) -> &[SymbolicResidue] {
        &self.residues
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}
