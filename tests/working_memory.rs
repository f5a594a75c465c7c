use std::collections::HashSet;

use ponder::residue::TransformationType;
use ponder::{CellPriority, ContextCell, ResidueTracker, TokenBudgetManager};

fn cell(id: &str, priority: CellPriority, tokens: usize) -> ContextCell {
    ContextCell::new(id, format!("content of {id}"), priority, tokens)
}

#[test]
fn high_priority_arrival_evicts_lowest_medium() {
    let mut memory = TokenBudgetManager::new(1000, 0.1);
    assert_eq!(memory.usable_budget(), 900);
    for id in ["m1", "m2", "m3"] {
        assert!(memory.admit(cell(id, CellPriority::Medium, 300)));
    }
    memory.touch("m2");
    memory.touch("m3");

    let admission = memory.admit_with_evictions(cell("urgent", CellPriority::High, 300));
    assert!(admission.admitted);
    let evicted: Vec<&str> = admission.evicted.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(evicted, vec!["m1"]);
    assert_eq!(memory.used_tokens(), 900);
}

#[test]
fn eviction_never_happens_partially() {
    let mut memory = TokenBudgetManager::new(500, 0.0);
    assert!(memory.admit(cell("e1", CellPriority::Ephemeral, 100)));
    assert!(memory.admit(cell("e2", CellPriority::Ephemeral, 100)));
    assert!(memory.admit(cell("c", CellPriority::Critical, 300)));

    let before: HashSet<String> = memory.cells().map(|c| c.id.clone()).collect();
    let admission = memory.admit_with_evictions(cell("big", CellPriority::High, 450));
    assert!(!admission.admitted);
    assert!(admission.evicted.is_empty());
    let after: HashSet<String> = memory.cells().map(|c| c.id.clone()).collect();
    assert_eq!(before, after);

    let admission = memory.admit_with_evictions(cell("mid", CellPriority::High, 200));
    assert!(admission.admitted);
    assert_eq!(admission.evicted.len(), 2);
    assert!(memory.used_tokens() <= memory.usable_budget());
}

#[test]
fn decayed_cells_fall_out_of_packaging_first() {
    let mut memory = TokenBudgetManager::new(200, 0.0);
    assert!(memory.admit(cell("old", CellPriority::Medium, 60)));
    memory.decay(0.9);
    assert!(memory.admit(cell("fresh", CellPriority::Medium, 60)));

    let packed = memory.package(Some(100));
    assert_eq!(packed.metadata.cells_included, vec!["fresh"]);
    assert_eq!(packed.metadata.cells_excluded, vec!["old"]);
    assert_eq!(packed.metadata.token_limit, 100);
    assert!((packed.metadata.utilization - 0.6).abs() < 1e-12);
}

#[test]
fn compression_chain_reaches_every_ancestor() {
    let mut a = cell("A", CellPriority::Medium, 400);
    let mut b = cell("B", CellPriority::Medium, 200);
    let c = cell("C", CellPriority::Medium, 50);

    let mut tracker = ResidueTracker::new();
    let first = tracker.record(
        std::slice::from_mut(&mut a),
        &b,
        TransformationType::Compression,
        vec![],
    );
    assert_eq!(first.compression_ratio, 0.5);
    let second = tracker.record(
        std::slice::from_mut(&mut b),
        &c,
        TransformationType::Compression,
        vec!["dates".into()],
    );
    assert_eq!(second.compression_ratio, 0.25);
    assert_eq!(a.derived_cells, vec!["B"]);
    assert_eq!(b.derived_cells, vec!["C"]);

    let chain: HashSet<String> = tracker.attribution_chain("C").into_iter().collect();
    assert!(chain.is_superset(&HashSet::from(["A".into(), "B".into(), "C".into()])));
    assert_eq!(tracker.attribution_chain("A"), vec!["A"]);
}
