use std::sync::Arc;
use std::time::Duration;

use ponder::{
    BeliefState, Candidate, CycleInput, DecisionEngine, EngineConfig, InMemorySink,
    MarkovBlanketPartition, ParticleType,
};
use tracing_test::traced_test;

const CONFIG: &str = r#"
[priors]
base_precision = 1.0

[[priors.constraints]]
name = "no-destruction"
description = "never destroy stored data"
level = "basal"
kind = "prohibit"
pattern = "delete.*database"

[[priors.constraints]]
name = "curious"
level = "learned"
kind = "prefer"
pattern = "explore"
precision = 0.5

[memory]
total_budget = 100
reserve_ratio = 0.1
persist_resonance_threshold = 0.9
"#;

fn candidates() -> Vec<Candidate> {
    vec![
        Candidate::new("drop", vec![1.0, 0.0], vec![1.0]).with_action("Delete the DATABASE now"),
        Candidate::new("explore", vec![0.9, 0.1], vec![0.5, 0.5]).with_action("explore the archive"),
        Candidate::new("idle", vec![0.0, 1.0], vec![0.25, 0.25, 0.25, 0.25]).with_action("wait"),
    ]
}

#[traced_test]
#[test]
fn configured_engine_runs_a_full_cycle() {
    let cfg = EngineConfig::from_toml_str(CONFIG).unwrap();
    let mut engine = DecisionEngine::from_config("pete", &cfg).unwrap();

    let outcome = engine
        .cycle(CycleInput {
            candidates: candidates(),
            goal: vec![1.0, 0.0],
            partition: Some(MarkovBlanketPartition::new(
                ["world"],
                ["eye"],
                ["hand"],
                ["mind", "memory"],
            )),
            belief_update: Some((
                BeliefState::isotropic(vec![0.0, 0.0], 5.0),
                BeliefState::isotropic(vec![0.0, 0.0], 8.0),
            )),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(outcome.selection.dominant.id(), Some("explore"));
    assert_eq!(outcome.selection.scores.len(), 2);
    let explore = outcome.selection.score_of("explore").unwrap();
    assert!((explore.precision.unwrap() - 1.05).abs() < 1e-12);

    let classification = outcome.classification.unwrap();
    assert_eq!(classification.particle_type, ParticleType::ActiveMetacognitive);
    assert!(classification.has_agency);
    assert!(outcome.gain.is_some());

    let packed = engine.package(None);
    assert_eq!(packed.content, "explore the archive");
    assert!(logs_contain("action blocked by basal prior"));
    assert!(logs_contain("decision cycle complete"));
}

#[test]
fn repeated_cycles_evict_and_leave_residue() {
    let cfg = EngineConfig::from_toml_str(CONFIG).unwrap();
    let mut engine = DecisionEngine::from_config("pete", &cfg).unwrap();
    let long = "x".repeat(160);
    let mut last = None;
    let mut evicted = Vec::new();
    for i in 0..3 {
        let outcome = engine
            .cycle(CycleInput {
                candidates: vec![Candidate::new(format!("c{i}"), vec![1.0], vec![1.0])
                    .with_action(format!("{long}{i}"))],
                goal: vec![1.0],
                belief_update: (i == 2).then(|| {
                    (
                        BeliefState::isotropic(vec![0.0], 5.0),
                        BeliefState::isotropic(vec![0.0], 8.0),
                    )
                }),
                ..Default::default()
            })
            .unwrap();
        evicted.extend(outcome.evicted.into_iter().map(|c| c.id));
        last = outcome.admitted;
    }
    let last = last.unwrap();
    assert!(!evicted.is_empty());
    assert!(engine.memory().used_tokens() <= engine.memory().usable_budget());
    let chain = engine.attribution_chain(&last);
    assert_eq!(chain[0], last);
    for id in &evicted {
        assert!(chain.contains(id));
    }
}

#[tokio::test]
async fn resonant_winners_reach_the_sink() {
    let cfg = EngineConfig::from_toml_str(CONFIG).unwrap();
    let sink = Arc::new(InMemorySink::new());
    let mut engine = DecisionEngine::from_config("pete", &cfg)
        .unwrap()
        .with_persistence(sink.clone());

    engine
        .cycle(CycleInput {
            candidates: vec![Candidate::new("aligned", vec![1.0, 0.0], vec![1.0]).with_action("align")],
            goal: vec![1.0, 0.0],
            ..Default::default()
        })
        .unwrap();
    engine
        .cycle(CycleInput {
            candidates: vec![Candidate::new("oblique", vec![1.0, 1.0], vec![1.0]).with_action("drift")],
            goal: vec![1.0, 0.0],
            ..Default::default()
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, "align");
    assert_eq!(engine.memory().len(), 2);
}

#[test]
fn empty_candidate_list_selects_none() {
    let mut engine = DecisionEngine::new("pete");
    let outcome = engine.cycle(CycleInput::default()).unwrap();
    assert_eq!(outcome.selection.dominant.to_string(), "none");
    assert!(outcome.admitted.is_none());
}
