//! Integration tests for trajectory-reweight-rs.
//!
//! These tests drive the full pipeline: weighted batching, trajectory
//! recording, clustering, reweighting and the epoch state machine.

use std::cell::Cell;

use candle_core::Device;
use candle_nn::{Optimizer, SGD};
use trajectory_reweight_rs::{
    data::BlobGenerator,
    run_comparison, ClusterAssignment, ClusteringStrategy, ExperimentConfig, FeatureMode,
    InMemoryDataset, MlpClassifier, Regime, Result, ReweightConfig, ReweightError, Reweighter,
    RunPhase, TrainingOrchestrator, TrajectoryClusterer, TrajectoryStore, WeightedDataSource,
};

type Orchestrator = TrainingOrchestrator<MlpClassifier, SGD, InMemoryDataset>;

/// Small two-class blob dataset.
fn blobs(n: usize, seed: u64) -> InMemoryDataset {
    BlobGenerator::new(2, 4, 1.0, seed)
        .unwrap()
        .sample(n, seed, &Device::Cpu)
        .unwrap()
}

fn orchestrator(dataset: InMemoryDataset, regime: Regime, config: &ReweightConfig) -> Orchestrator {
    let model = MlpClassifier::new(4, 8, 2, 7, &Device::Cpu).unwrap();
    let optimizer = SGD::new(model.vars(), 0.05).unwrap();
    let source = WeightedDataSource::new(dataset, 3);
    TrainingOrchestrator::new(model, optimizer, source, regime, config, 4)
        .unwrap()
        .with_log_interval(0)
}

/// Trajectories where `low` examples sit at 0.0 and `high` examples at 100.0.
fn separated_store(low: usize, high: usize, passes: usize) -> TrajectoryStore {
    let mut store = TrajectoryStore::new();
    for _ in 0..passes {
        let mut pass = vec![vec![0.0f32]; low];
        pass.extend(vec![vec![100.0f32]; high]);
        store.append_pass(pass).unwrap();
    }
    store
}

// =============================================================================
// State machine
// =============================================================================

#[test]
fn test_ten_examples_two_clusters_burn_in_one() {
    let config = ReweightConfig::default().with_num_cluster(2).with_burn_in(1);
    let mut orch = orchestrator(blobs(10, 1), Regime::Reweight, &config);

    let first = orch.train_epoch().unwrap();
    assert_eq!(first.phase, RunPhase::Warmup);
    assert!(orch.source().weights().iter().all(|&w| w == 1.0));
    assert_eq!(orch.recorder().passes(), 0);

    let second = orch.train_epoch().unwrap();
    assert_eq!(second.phase, RunPhase::Recluster);
    assert_eq!(orch.recorder().passes(), 1);

    let assignment = orch.last_assignment().unwrap();
    assert_eq!(assignment.len(), 10);
    assert_eq!(assignment.num_cluster(), 2);
    assert_eq!(assignment.cluster_sizes().iter().sum::<usize>(), 10);

    let weights = orch.source().weights();
    assert_eq!(weights.len(), 10);
    assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));
}

#[test]
fn test_trajectory_length_equals_passes() {
    let config = ReweightConfig::default().with_num_cluster(2).with_burn_in(1);
    let mut orch = orchestrator(blobs(12, 2), Regime::Reweight, &config);

    for _ in 0..4 {
        orch.train_epoch().unwrap();
        let store = orch.recorder().store();
        assert!(store.iter().all(|t| t.len() == store.passes()));
    }
    assert_eq!(orch.recorder().passes(), 3);
}

#[test]
fn test_standard_regime_never_records() {
    let config = ReweightConfig::default().with_num_cluster(2).with_burn_in(0);
    let mut orch = orchestrator(blobs(10, 3), Regime::Standard, &config);
    for _ in 0..3 {
        assert_eq!(orch.train_epoch().unwrap().phase, RunPhase::Warmup);
    }
    assert_eq!(orch.recorder().passes(), 0);
    assert!(orch.last_assignment().is_none());
}

#[test]
fn test_uniform_policy_matches_standard_bit_for_bit() {
    let config = ReweightConfig::default().with_num_cluster(2).with_burn_in(1);
    let mut standard = orchestrator(blobs(20, 4), Regime::Standard, &config);
    let mut reweight = orchestrator(blobs(20, 4), Regime::Reweight, &config)
        .with_reweighter(Reweighter::uniform());

    for _ in 0..3 {
        let a = standard.train_epoch().unwrap();
        let b = reweight.train_epoch().unwrap();
        assert_eq!(a.batch_loss.to_bits(), b.batch_loss.to_bits());
    }
    assert!(reweight.source().weights().iter().all(|&w| w == 1.0));
}

// =============================================================================
// Insufficient data
// =============================================================================

#[test]
fn test_single_example_three_clusters_is_insufficient() {
    let mut store = TrajectoryStore::new();
    store.append_pass(vec![vec![0.3, 0.7]]).unwrap();
    let clusterer = TrajectoryClusterer::from_config(&ReweightConfig::default());

    let err = clusterer.fit_predict(&store, 3).unwrap_err();
    assert!(matches!(
        err,
        ReweightError::InsufficientData {
            examples: 1,
            clusters: 3
        }
    ));
    assert!(err.is_recoverable());
}

/// Splits the first eight examples from the rest once, then reports instability.
struct UnstableAfterFirstFit {
    calls: Cell<usize>,
}

impl ClusteringStrategy for UnstableAfterFirstFit {
    fn name(&self) -> &'static str {
        "unstable-after-first-fit"
    }

    fn fit_predict(&self, features: &[Vec<f64>], num_cluster: usize) -> Result<ClusterAssignment> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call > 0 {
            return Err(ReweightError::NumericalInstability(
                "covariance collapsed".to_string(),
            ));
        }
        let labels = (0..features.len()).map(|i| usize::from(i >= 8)).collect();
        ClusterAssignment::new(labels, vec![1.0; features.len()], num_cluster)
    }
}

#[test]
fn test_unstable_clustering_falls_back_to_uniform_weights() {
    let config = ReweightConfig::default().with_num_cluster(2).with_burn_in(0);
    let clusterer = TrajectoryClusterer::new(
        Box::new(UnstableAfterFirstFit {
            calls: Cell::new(0),
        }),
        FeatureMode::Concatenate,
    );
    let mut orch =
        orchestrator(blobs(10, 6), Regime::Reweight, &config).with_clusterer(clusterer);

    let first = orch.train_epoch().unwrap();
    assert_eq!(first.phase, RunPhase::Recluster);
    assert!(orch.source().weights().iter().any(|&w| w != 1.0));

    let second = orch.train_epoch().unwrap();
    assert_eq!(second.phase, RunPhase::Tracking);
    assert!(second.weights.is_none());
    assert!(orch.source().weights().iter().all(|&w| w == 1.0));
    assert_eq!(orch.recorder().passes(), 2);
}

#[test]
fn test_orchestrator_skips_reweighting_without_enough_examples() {
    let config = ReweightConfig::default().with_num_cluster(3).with_burn_in(0);
    let mut orch = orchestrator(blobs(1, 5), Regime::Reweight, &config);

    let outcome = orch.train_epoch().unwrap();
    assert_eq!(outcome.phase, RunPhase::Tracking);
    assert!(outcome.weights.is_none());
    assert_eq!(orch.source().weights(), &[1.0]);
    assert_eq!(orch.recorder().passes(), 1);
}

// =============================================================================
// Separation and determinism
// =============================================================================

#[test]
fn test_far_apart_groups_get_different_weights() {
    let store = separated_store(8, 2, 2);
    let config = ReweightConfig::default().with_num_cluster(2);
    let assignment = TrajectoryClusterer::from_config(&config)
        .fit_predict(&store, 2)
        .unwrap();

    let labels = assignment.labels();
    assert!(labels[..8].iter().all(|&l| l == labels[0]));
    assert!(labels[8..].iter().all(|&l| l == labels[8]));
    assert_ne!(labels[0], labels[8]);
    assert!(assignment.confidence().iter().all(|&c| c > 0.99));

    let weights = Reweighter::from_config(&config.policy)
        .compute_weights(&assignment, config.scale)
        .unwrap();
    assert!(weights[0] - weights[9] > 0.5);
}

#[test]
fn test_even_and_lopsided_splits_keep_an_outlier_cluster() {
    let config = ReweightConfig::default().with_num_cluster(2);
    for (low, high) in [(5, 5), (7, 3)] {
        let store = separated_store(low, high, 2);
        let assignment = TrajectoryClusterer::from_config(&config)
            .fit_predict(&store, 2)
            .unwrap();
        let labels = assignment.labels();
        assert_ne!(labels[0], labels[9], "{low}/{high} split not separated");

        let weights = Reweighter::from_config(&config.policy)
            .compute_weights(&assignment, config.scale)
            .unwrap();
        assert!(
            (weights[0] - weights[9]).abs() > 0.5,
            "{low}/{high} split: {} vs {}",
            weights[0],
            weights[9]
        );
        if low > high {
            assert!(weights[0] > weights[9]);
        }
    }
}

#[test]
fn test_clustering_is_deterministic() {
    let mut store = TrajectoryStore::new();
    for pass in 0..3 {
        let signals = (0..40)
            .map(|i| {
                let x = ((i * 7 + pass * 3) % 11) as f32 / 11.0;
                vec![x, 1.0 - x]
            })
            .collect();
        store.append_pass(signals).unwrap();
    }
    let config = ReweightConfig::default().with_seed(11);

    let a = TrajectoryClusterer::from_config(&config)
        .fit_predict(&store, 3)
        .unwrap();
    let b = TrajectoryClusterer::from_config(&config)
        .fit_predict(&store, 3)
        .unwrap();
    assert!(a.same_partition(&b));
    assert_eq!(a.confidence(), b.confidence());
}

#[test]
fn test_trusted_confident_example_has_max_weight() {
    let assignment = ClusterAssignment::new(
        vec![0, 0, 0, 0, 0, 1, 1, 1, 2, 2],
        vec![1.0, 0.8, 0.6, 0.9, 0.4, 1.0, 0.2, 0.7, 1.0, 0.5],
        3,
    )
    .unwrap();
    let weights = Reweighter::from_config(&Default::default())
        .compute_weights(&assignment, 1e6)
        .unwrap();

    let max = weights.iter().copied().fold(f32::MIN, f32::max);
    assert_eq!(weights[0], max);
    assert!(weights[8] < weights[0]);
    assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));
}

// =============================================================================
// Configuration and reports
// =============================================================================

fn tiny_experiment() -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.batch_size = 16;
    config.epochs = 2;
    config.valid_size = 20;
    config.hidden_dim = 8;
    config.log_interval = 0;
    config.data.train_size = 80;
    config.data.test_size = 20;
    config.data.num_classes = 3;
    config.data.input_dim = 4;
    config.reweight = ReweightConfig::default().with_num_cluster(2).with_burn_in(1);
    config
}

#[test]
fn test_experiment_config_toml_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiment.toml");

    let config = tiny_experiment();
    config.to_file(&path).unwrap();
    let loaded = ExperimentConfig::from_file(&path).unwrap();

    assert_eq!(loaded.epochs, 2);
    assert_eq!(loaded.data.train_size, 80);
    assert_eq!(loaded.reweight.num_cluster, 2);
    assert_eq!(loaded.reweight.burn_in, 1);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_comparison_report_appends_one_line_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.data");
    let config = tiny_experiment();

    let report = run_comparison(&config, &Device::Cpu).unwrap();
    assert_eq!(report.standard.epochs.len(), 2);
    assert_eq!(report.reweight.epochs.len(), 2);
    assert_eq!(report.noisy_examples, 6);
    assert_eq!(report.reweight.epochs[0].phase, RunPhase::Warmup);

    report.append_jsonl(&path).unwrap();
    report.append_jsonl(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["config"]["epochs"], 2);
    assert!(value["timestamp"].is_string());
    assert!(value["standard"]["epochs"][1]["test"]["accuracy"].is_number());
}

#[test]
fn test_invalid_experiment_is_rejected() {
    let mut config = tiny_experiment();
    config.valid_size = config.data.train_size;
    assert!(matches!(
        run_comparison(&config, &Device::Cpu),
        Err(ReweightError::InvalidConfig(_))
    ));
}
