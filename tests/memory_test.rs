// tests/memory_test.rs — Integration test: memory and weight persistence on disk

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use fusionloop::core::types::{Candidate, Domain, Proposal};
use fusionloop::fusion::{FusionEngine, FusionParams};
use fusionloop::memory::{
    JsonMemoryStore, JsonWeightStore, MemoryParams, SharedMemory, StatsLedger, TunedFusion,
    WeightFile, WeightResolver, WeightStore,
};

fn cand(p: [u32; 6], s: u32) -> Candidate {
    Candidate::new(p, s, &Domain::default()).unwrap()
}

fn disk_memory(dir: &TempDir) -> SharedMemory {
    SharedMemory::new(
        Box::new(JsonMemoryStore::new(dir.path().join("memory.json"))),
        MemoryParams::default(),
    )
}

// ─── Memory ─────────────────────────────────────────────────────────────────

#[test]
fn test_memory_survives_restart() {
    let dir = TempDir::new().unwrap();
    let fused = cand([3, 9, 14, 21, 27, 33], 5);
    {
        let memory = disk_memory(&dir);
        memory.update(&fused, &[fused.clone()]).unwrap();
        memory.update(&fused, &[]).unwrap();
    }

    let reopened = disk_memory(&dir).snapshot();
    assert!(!reopened.is_empty());
    assert!(reopened.updated_at.is_some());
    let top: Vec<u32> = reopened.top_primary(6).into_iter().map(|(n, _)| n).collect();
    let mut top = top;
    top.sort_unstable();
    assert_eq!(top, vec![3, 9, 14, 21, 27, 33]);
    assert!(reopened.secondary[&5] > 0.0);
}

#[test]
fn test_corrupt_memory_reads_empty_and_recovers() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("memory.json"), "{not json").unwrap();

    let memory = disk_memory(&dir);
    assert!(memory.snapshot().is_empty());

    // the next update starts over from empty memory and replaces the file
    memory.update(&cand([1, 2, 3, 4, 5, 6], 1), &[]).unwrap();
    assert!(!disk_memory(&dir).snapshot().is_empty());
}

#[test]
fn test_counters_decay_between_updates() {
    let dir = TempDir::new().unwrap();
    let memory = SharedMemory::new(
        Box::new(JsonMemoryStore::new(dir.path().join("memory.json"))),
        MemoryParams {
            decay: 0.9,
            boost_fused: 1.0,
            boost_candidate: 0.0,
        },
    );
    let first = cand([1, 2, 3, 4, 5, 6], 1);
    let other = cand([10, 11, 12, 13, 14, 15], 2);

    let m1 = memory.update(&first, &[]).unwrap();
    assert!((m1.primary[&1] - 1.0).abs() < 1e-12);

    let m2 = memory.update(&other, &[]).unwrap();
    assert!((m2.primary[&1] - 0.9).abs() < 1e-12);
    assert!((m2.primary[&10] - 1.0).abs() < 1e-12);

    let m3 = memory.update(&other, &[]).unwrap();
    assert!(m3.primary[&1] < m2.primary[&1]);
}

#[test]
fn test_fusion_learns_into_disk_memory() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(disk_memory(&dir));
    let engine = FusionEngine::new(
        Domain::default(),
        FusionParams::default(),
        memory.clone(),
        Arc::new(WeightResolver::uniform()),
    )
    .with_seed(Some(8));

    let proposals = vec![Proposal::new("a", cand([2, 7, 13, 19, 24, 31], 4))];
    let fused = engine.fuse(&proposals, 0).unwrap();
    assert!(engine.last_trace().unwrap().priors_used.is_empty());

    assert!(engine.update_memory(&fused, &[fused.clone()]).unwrap());
    assert!(dir.path().join("memory.json").exists());

    engine.fuse(&proposals, 1).unwrap();
    assert_eq!(
        engine.last_trace().unwrap().priors_used,
        vec!["memory".to_string()]
    );
}

// ─── Weights ────────────────────────────────────────────────────────────────

#[test]
fn test_tuned_weights_restricted_to_registered_strategies() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("strategy_weights.json");
    std::fs::write(
        &path,
        r#"{
            "weights": {"hot": 1.4, "cold": 0.6, "retired": 2.0},
            "fusion": {"alpha_primary": 0.5}
        }"#,
    )
    .unwrap();

    let resolver = WeightResolver::new(
        Some(Box::new(JsonWeightStore::new(path))),
        Arc::new(StatsLedger::new()),
        50,
        vec!["hot".into(), "cold".into()],
    );
    let weights = resolver.resolve();
    assert_eq!(weights.len(), 2);
    assert_eq!(weights["hot"], 1.4);
    assert!(!weights.contains_key("retired"));

    let tuned = resolver.tuned().unwrap().fusion.unwrap();
    assert_eq!(tuned.alpha_primary, Some(0.5));
    assert_eq!(tuned.temperature_primary, None);
}

#[test]
fn test_weight_file_written_by_store_is_read_back() {
    let dir = TempDir::new().unwrap();
    let store = JsonWeightStore::new(dir.path().join("w.json"));
    assert!(store.load().unwrap().is_none());

    let file = WeightFile {
        weights: [("a".to_string(), 0.8)].into_iter().collect(),
        fusion: Some(TunedFusion {
            top_p_secondary: Some(0.7),
            ..Default::default()
        }),
        updated_at: None,
    };
    store.save(&file).unwrap();
    assert_eq!(store.load().unwrap(), Some(file));
}

#[test]
fn test_unreadable_weights_fall_back_to_dynamic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("w.json");
    std::fs::write(&path, "[]").unwrap();

    let ledger = Arc::new(StatsLedger::new());
    ledger.record(
        0,
        [
            ("a".to_string(), fusionloop::core::types::StrategyStats { attempts: 10, matches: 3 }),
            ("b".to_string(), fusionloop::core::types::StrategyStats { attempts: 10, matches: 0 }),
        ]
        .into_iter()
        .collect(),
    );
    let resolver = WeightResolver::new(
        Some(Box::new(JsonWeightStore::new(path))),
        ledger,
        10,
        vec!["a".into(), "b".into()],
    );
    let weights = resolver.resolve();
    assert!(weights["a"] > weights["b"]);
}
