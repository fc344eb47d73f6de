use std::sync::Arc;

use grainvdb_cuda::{ComputeBackend, CpuBackend, EntryPoint, KernelModule};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::*;
use crate::config::{AuditConfig, StoreConfig};
use crate::error::EngineError;
use crate::query::QueryEngine;
use crate::store::ManifoldStore;

fn store_with(backend: CpuBackend, rank: usize, rows: &[f32]) -> ManifoldStore {
    let backend: Arc<dyn ComputeBackend> = Arc::new(backend);
    let mut store = ManifoldStore::new(rank, backend, StoreConfig::default()).unwrap();
    store.ingest(rows, rows.len() / rank, None).unwrap();
    store
}

/// 0 = [1,0], 1 close to 0, 2 further, 3 orthogonal.
fn fan_store() -> ManifoldStore {
    let rows = [1.0, 0.0, 0.99, 0.1, 0.9, 0.4, 0.0, 1.0];
    store_with(CpuBackend::new(), 2, &rows)
}

/// Unit vectors at 0, 10, 11 and 90 degrees.
fn angle_store() -> ManifoldStore {
    let rows = [
        1.0, 0.0, //
        0.984_807_75, 0.173_648_18, //
        0.981_627_2, 0.190_809, //
        0.0, 1.0,
    ];
    store_with(CpuBackend::new(), 2, &rows)
}

// ========== Score Tests ==========

#[test]
fn test_single_id_scores_one_without_dispatch() {
    let backend = CpuBackend::new().with_module(KernelModule::from_entry_points("none", []));
    let store = store_with(backend, 2, &[1.0, 0.0, 0.0, 1.0]);
    let report = TopologyAuditor::default().audit(&store, &[1]).unwrap();
    assert_eq!(report.score, 1.0);
    assert_eq!(report.cohesion, 1.0);
    assert_eq!(report.latency_ms, 0.0);
    assert_eq!(report.connectivity, 1.0);
    assert_eq!(report.anchor, 1);
    assert_eq!(report.neighbors, 0);
}

#[test]
fn test_true_neighbors_score_one() {
    let store = fan_store();
    let report = TopologyAuditor::default().audit(&store, &[0, 1, 2]).unwrap();
    assert_eq!(report.score, 1.0);
    assert!(report.is_consistent());
    assert_eq!(report.anchor, 0);
    assert_eq!(report.neighbors, 2);
}

#[test]
fn test_distant_neighbor_lowers_score() {
    let store = fan_store();
    let auditor = TopologyAuditor::default();

    // Rows 1 and 2 are both closer to the anchor than row 3.
    let report = auditor.audit(&store, &[0, 3]).unwrap();
    assert!((report.score - 1.0 / 3.0).abs() < 1e-9);

    let report = auditor.audit(&store, &[0, 1, 3]).unwrap();
    assert!((report.score - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
    assert!(!report.is_consistent());
}

#[test]
fn test_score_ignores_id_order() {
    let store = angle_store();
    let auditor = TopologyAuditor::default();

    // Row 0's nearest row is 1, but row 1's nearest row is 2.
    let forward = auditor.audit(&store, &[0, 1]).unwrap();
    let reversed = auditor.audit(&store, &[1, 0]).unwrap();
    assert_eq!(forward.score, 1.0);
    assert_eq!(reversed.score, forward.score);
    assert_eq!(reversed.cohesion, forward.cohesion);
    assert!((forward.cohesion - 0.75).abs() < 1e-9);
    assert_eq!(forward.anchor, 0);
    assert_eq!(reversed.anchor, 0);
}

#[test]
fn test_every_permutation_scores_the_same() {
    let store = angle_store();
    let auditor = TopologyAuditor::default();
    let baseline = auditor.audit(&store, &[0, 1, 3]).unwrap();
    for ids in [[0, 3, 1], [1, 0, 3], [1, 3, 0], [3, 0, 1], [3, 1, 0]] {
        let report = auditor.audit(&store, &ids).unwrap();
        assert_eq!(report.score, baseline.score, "ids {:?}", ids);
        assert_eq!(report.cohesion, baseline.cohesion, "ids {:?}", ids);
        assert_eq!(report.neighbors, 2);
        assert!((report.connectivity - baseline.connectivity).abs() < 1e-9);
    }
}

#[test]
fn test_cohesion_never_exceeds_score() {
    let store = fan_store();
    let auditor = TopologyAuditor::default();
    for ids in [&[0u64, 3][..], &[0, 1, 3], &[1, 2, 3], &[0, 1, 2, 3]] {
        let report = auditor.audit(&store, ids).unwrap();
        assert!(report.cohesion <= report.score + 1e-12, "ids {:?}", ids);
        assert!((0.0..=1.0).contains(&report.score));
    }
}

#[test]
fn test_duplicates_collapse_to_first_occurrence() {
    let store = fan_store();
    let auditor = TopologyAuditor::default();
    let plain = auditor.audit(&store, &[0, 1, 3]).unwrap();
    let repeated = auditor.audit(&store, &[0, 1, 0, 3, 1, 3]).unwrap();
    assert_eq!(plain.score, repeated.score);
    assert_eq!(repeated.neighbors, 2);
}

#[test]
fn test_query_result_audits_consistent_on_random_manifold() {
    let (rows, rank, top) = (1_500, 16, 12);
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let data: Vec<f32> = (0..rows * rank).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let store = store_with(CpuBackend::new(), rank, &data);

    for anchor in [0u64, 321, 1_499] {
        let probe = store.vector(anchor).unwrap();
        let outcome = QueryEngine::resolve(&store, &probe, top).unwrap();
        assert_eq!(outcome.result.first().map(|n| n.id), Some(anchor));

        let report = TopologyAuditor::default()
            .audit(&store, &outcome.result.ids())
            .unwrap();
        assert_eq!(report.score, 1.0, "anchor {}", anchor);
    }
}

// ========== Precondition Tests ==========

#[test]
fn test_empty_ids_rejected() {
    let store = fan_store();
    assert!(matches!(
        TopologyAuditor::default().audit(&store, &[]),
        Err(EngineError::EmptyInput(_))
    ));
}

#[test]
fn test_invalid_reference_aborts_audit() {
    let store = fan_store();
    let err = TopologyAuditor::default().audit(&store, &[0, 1, 9]).unwrap_err();
    assert!(matches!(err, EngineError::InvalidReference { id: 9, size: 4 }));
}

#[test]
fn test_missing_density_entry_point_is_dispatch_failure() {
    let module = KernelModule::from_entry_points(
        "no_audit.ptx",
        [EntryPoint::SimilarityScore, EntryPoint::PartialTopK],
    );
    let store = store_with(CpuBackend::new().with_module(module), 2, &[1.0, 0.0, 0.0, 1.0]);
    let err = TopologyAuditor::default().audit(&store, &[0, 1]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::DispatchFailure {
            operation: "audit",
            ..
        }
    ));
}

// ========== Connectivity Tests ==========

#[test]
fn test_tight_cluster_is_connected() {
    let store = fan_store();
    let report = TopologyAuditor::default().audit(&store, &[0, 1, 2]).unwrap();
    // All pairwise cosines exceed 0.8: complete graph on 3 vertices.
    assert!((report.connectivity - 3.0).abs() < 1e-9);
}

#[test]
fn test_fractured_set_has_zero_connectivity() {
    let store = fan_store();
    let report = TopologyAuditor::default().audit(&store, &[0, 1, 3]).unwrap();
    assert!(report.connectivity.abs() < 1e-9);
}

#[test]
fn test_threshold_controls_connectivity() {
    let store = fan_store();
    let strict = TopologyAuditor::new(AuditConfig {
        connectivity_threshold: 0.999,
    });
    let report = strict.audit(&store, &[0, 1, 2]).unwrap();
    assert!(report.connectivity.abs() < 1e-9);
}

// ========== Gluing Energy Tests ==========

#[test]
fn test_gluing_energy_same_neighborhood_is_zero() {
    let store = fan_store();
    let energy = TopologyAuditor::default()
        .gluing_energy(&store, &[0, 1], &[1, 0])
        .unwrap();
    assert!(energy.abs() < 1e-6);
}

#[test]
fn test_gluing_energy_orthogonal_neighborhoods() {
    let store = fan_store();
    let energy = TopologyAuditor::default()
        .gluing_energy(&store, &[0], &[3])
        .unwrap();
    assert!((energy - 1.0).abs() < 1e-6);
}

#[test]
fn test_gluing_energy_preconditions() {
    let store = fan_store();
    let auditor = TopologyAuditor::default();
    assert!(matches!(
        auditor.gluing_energy(&store, &[], &[0]),
        Err(EngineError::EmptyInput(_))
    ));
    assert!(matches!(
        auditor.gluing_energy(&store, &[0], &[4]),
        Err(EngineError::InvalidReference { id: 4, size: 4 })
    ));
}
