use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four regions of a Markov-blanket partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    External,
    Sensory,
    Active,
    Internal,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Region::External => "external",
            Region::Sensory => "sensory",
            Region::Active => "active",
            Region::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Paths shared by two regions of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlap {
    pub first: Region,
    pub second: Region,
    pub shared: BTreeSet<String>,
}

/// Four-way split of path identifiers into external (η), sensory (s),
/// active (a) and internal (μ) sets.
///
/// The partition is valid when the sets are pairwise disjoint.
///
/// ```
/// use ponder::MarkovBlanketPartition;
///
/// let p = MarkovBlanketPartition::new(["world"], ["eye"], ["hand"], ["mind", "memory"]);
/// assert!(p.is_valid_partition());
/// assert_eq!(p.blanket().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkovBlanketPartition {
    #[serde(default)]
    pub external: BTreeSet<String>,
    #[serde(default)]
    pub sensory: BTreeSet<String>,
    #[serde(default)]
    pub active: BTreeSet<String>,
    #[serde(default)]
    pub internal: BTreeSet<String>,
}

impl MarkovBlanketPartition {
    pub fn new<E, S, A, I>(external: E, sensory: S, active: A, internal: I) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            external: external.into_iter().map(Into::into).collect(),
            sensory: sensory.into_iter().map(Into::into).collect(),
            active: active.into_iter().map(Into::into).collect(),
            internal: internal.into_iter().map(Into::into).collect(),
        }
    }

    pub fn region(&self, region: Region) -> &BTreeSet<String> {
        match region {
            Region::External => &self.external,
            Region::Sensory => &self.sensory,
            Region::Active => &self.active,
            Region::Internal => &self.internal,
        }
    }

    /// Sensory and active paths together.
    pub fn blanket(&self) -> BTreeSet<String> {
        self.sensory.union(&self.active).cloned().collect()
    }

    /// Every non-empty pairwise intersection, in the fixed order
    /// (η,s) (η,a) (η,μ) (s,a) (s,μ) (a,μ).
    pub fn get_overlaps(&self) -> Vec<Overlap> {
        const REGIONS: [Region; 4] = [
            Region::External,
            Region::Sensory,
            Region::Active,
            Region::Internal,
        ];
        let mut overlaps = Vec::new();
        for (i, &first) in REGIONS.iter().enumerate() {
            for &second in &REGIONS[i + 1..] {
                let shared: BTreeSet<String> = self
                    .region(first)
                    .intersection(self.region(second))
                    .cloned()
                    .collect();
                if !shared.is_empty() {
                    overlaps.push(Overlap {
                        first,
                        second,
                        shared,
                    });
                }
            }
        }
        overlaps
    }

    pub fn is_valid_partition(&self) -> bool {
        self.get_overlaps().is_empty()
    }
}
