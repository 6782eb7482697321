//! End-to-end tests for the calibration loop with scripted simulator
//! doubles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use calibrator::calibration::{Calibration, IterationOutcome, Phase, StopReason};
use calibrator::config::RunConfig;
use calibrator::error::{Error, SimulationFailure};
use calibrator::simulator::{SeriesArtifactExtractor, Simulator};
use calibrator::target::{TargetSource, TimeSeries};

// =============================================================================
// Test doubles
// =============================================================================

/// What one scripted simulator call should do.
#[derive(Clone, Copy)]
enum Step {
    /// Write a flat series at this value on the target grid.
    Flat(f64),
    /// Write a flat series at the first received parameter value.
    EchoParam,
    /// Fail with a non-zero-exit failure.
    Fail,
}

/// Simulator double that follows a script, repeating the last step once
/// the script runs out.
struct ScriptedSimulator {
    dir: PathBuf,
    script: Vec<Step>,
    calls: AtomicUsize,
}

impl ScriptedSimulator {
    fn new(dir: &TempDir, script: Vec<Step>) -> Self {
        Self {
            dir: dir.path().to_path_buf(),
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Simulator for ScriptedSimulator {
    fn run(&self, params: &[f64]) -> Result<PathBuf, SimulationFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let step = self.script[call.min(self.script.len() - 1)];
        let value = match step {
            Step::Fail => return Err(SimulationFailure::NonZeroExit { status: 1 }),
            Step::Flat(value) => value,
            Step::EchoParam => params[0],
        };

        let path = self.dir.join(format!("out_{call}.txt"));
        let body: String = [0.0, 1.0, 2.0]
            .iter()
            .map(|t| format!("{t} {value}\n"))
            .collect();
        std::fs::write(&path, body).map_err(|e| SimulationFailure::MalformedOutput {
            reason: e.to_string(),
        })?;
        Ok(path)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn flat_target(value: f64) -> TargetSource {
    TargetSource::Synthetic(TimeSeries::new(vec![0.0, 1.0, 2.0], vec![value; 3]).unwrap())
}

fn one_dim_config(n_iterations: usize) -> RunConfig {
    RunConfig::builder()
        .stable_params(vec![0.5])
        .active_indices(vec![0])
        .n_candidates(300)
        .n_iterations(n_iterations)
        .gp_max_iters(80)
        .retry_budget(3)
        .seed(42)
        .build()
        .unwrap()
}

/// Seed set of flat-line simulations at the given parameter values.
fn flat_seeds(values: &[f64]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let params = values.iter().map(|&v| vec![v]).collect();
    let features = values.iter().map(|&v| vec![v; 3]).collect();
    (params, features)
}

// =============================================================================
// Seeding
// =============================================================================

#[test]
fn seed_pair_matching_target_scores_zero_and_wins() {
    // One seed series equals the target exactly; its error must be 0.0
    // and it must be the best point in the seed set.
    let dir = tempfile::tempdir().unwrap();
    let target =
        TargetSource::Synthetic(TimeSeries::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 1.5]).unwrap());

    let seed_params = vec![vec![0.2], vec![0.6], vec![0.9]];
    let seed_features = vec![
        vec![0.8, 1.7, 1.9],
        vec![1.0, 2.0, 1.5], // exact match
        vec![1.4, 2.6, 1.1],
    ];

    let calibration = Calibration::builder()
        .config(one_dim_config(1))
        .target(target)
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Flat(1.0)]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    assert!(calibration.best_error().abs() < 1e-12);
    assert_eq!(calibration.best_params(), &[0.6]);
    assert_eq!(calibration.phase(), Phase::Initializing);
}

#[test]
fn empty_target_fails_initialization_with_insufficient_data() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("target.txt");
    std::fs::write(&empty, "").unwrap();

    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);
    let err = Calibration::builder()
        .config(one_dim_config(1))
        .target(TargetSource::FileBased(empty))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Flat(1.0)]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap_err();

    assert!(
        matches!(err, Error::InsufficientData { .. }),
        "expected InsufficientData, got {err:?}"
    );
}

#[test]
fn non_positive_seed_parameter_fails_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let (mut seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);
    seed_params[1][0] = 0.0;

    let err = Calibration::builder()
        .config(one_dim_config(1))
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Flat(1.0)]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::NonPositiveParameter { row: 1, .. }));
}

#[test]
fn seed_files_load_persisted_matrices() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = dir.path().join("master_parameter_input.txt");
    let features_path = dir.path().join("master_feature_output.txt");
    std::fs::write(&params_path, "0.2\n0.5\n0.8\n").unwrap();
    std::fs::write(&features_path, "0.2 0.2 0.2\n0.5 0.5 0.5\n0.8 0.8 0.8\n").unwrap();

    let calibration = Calibration::builder()
        .config(one_dim_config(1))
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Flat(1.0)]))
        .extractor(SeriesArtifactExtractor)
        .seed_files(&params_path, &features_path)
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(calibration.n_training_points(), 3);
    assert!((calibration.best_error() - 0.15).abs() < 1e-9);
}

#[test]
fn train_limit_caps_the_seed_set() {
    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.4, 0.6, 0.8]);

    let config = RunConfig::builder()
        .stable_params(vec![0.5])
        .active_indices(vec![0])
        .n_candidates(100)
        .n_iterations(1)
        .gp_max_iters(50)
        .train_limit(3)
        .seed(1)
        .build()
        .unwrap();

    let calibration = Calibration::builder()
        .config(config)
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Flat(1.0)]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    assert_eq!(calibration.n_training_points(), 3);
}

// =============================================================================
// The loop
// =============================================================================

#[test]
fn successful_iterations_grow_the_training_set_by_one_each() {
    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);

    let mut calibration = Calibration::builder()
        .config(one_dim_config(4))
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::EchoParam]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let report = calibration.run().unwrap();

    assert_eq!(report.stop_reason, StopReason::IterationBudget);
    assert_eq!(report.n_evaluations, 3 + 4);
    assert_eq!(report.records.len(), 4);
    assert!(
        report
            .records
            .iter()
            .all(|r| r.outcome == IterationOutcome::Completed)
    );
    assert_eq!(calibration.phase(), Phase::Converged);
}

#[test]
fn best_error_is_monotonically_non_increasing_across_records() {
    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);

    let mut calibration = Calibration::builder()
        .config(one_dim_config(5))
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::EchoParam]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let report = calibration.run().unwrap();

    let mut previous = f64::INFINITY;
    for record in &report.records {
        assert!(
            record.best_error <= previous + 1e-15,
            "best error went up: {previous} -> {}",
            record.best_error
        );
        previous = record.best_error;
    }
    // The echo solver can realize any candidate, so the best seed error
    // (0.15 at parameter 0.5) can only improve or hold.
    assert!(report.best_error <= 0.15 + 1e-9);
}

#[test]
fn failed_simulations_are_recorded_but_never_appended() {
    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);

    let script = vec![Step::Fail, Step::EchoParam, Step::Fail, Step::EchoParam];
    let mut calibration = Calibration::builder()
        .config(one_dim_config(4))
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, script))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let report = calibration.run().unwrap();

    let completed = report
        .records
        .iter()
        .filter(|r| r.outcome == IterationOutcome::Completed)
        .count();
    let failed = report
        .records
        .iter()
        .filter(|r| r.outcome == IterationOutcome::SimulationFailed)
        .count();
    assert_eq!(completed, 2);
    assert_eq!(failed, 2);
    assert_eq!(report.n_evaluations, 3 + completed);
    assert!(
        report
            .records
            .iter()
            .filter(|r| r.outcome == IterationOutcome::SimulationFailed)
            .all(|r| r.error.is_none())
    );
}

#[test]
fn exhausted_retry_budget_fails_the_run_but_keeps_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);

    let config = RunConfig::builder()
        .stable_params(vec![0.5])
        .active_indices(vec![0])
        .n_candidates(100)
        .n_iterations(10)
        .gp_max_iters(50)
        .retry_budget(1)
        .seed(3)
        .build()
        .unwrap();

    let mut calibration = Calibration::builder()
        .config(config)
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Fail]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let err = calibration.run().unwrap_err();
    assert!(matches!(
        err,
        Error::RetryBudgetExhausted {
            budget: 1,
            failures: 2
        }
    ));

    // Progress survives the failure: records and the seed best remain.
    assert_eq!(calibration.phase(), Phase::Failed);
    assert_eq!(calibration.records().len(), 2);
    assert_eq!(calibration.n_training_points(), 3);
    assert!((calibration.best_error() - 0.15).abs() < 1e-9);
    assert_eq!(calibration.best_params(), &[0.2]);
}

#[test]
fn patience_window_stops_a_stalled_run() {
    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);

    let config = RunConfig::builder()
        .stable_params(vec![0.5])
        .active_indices(vec![0])
        .n_candidates(100)
        .n_iterations(10)
        .gp_max_iters(50)
        .patience(2)
        .seed(5)
        .build()
        .unwrap();

    // A solver stuck far from the target can never improve on the seeds.
    let mut calibration = Calibration::builder()
        .config(config)
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::Flat(9.0)]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let report = calibration.run().unwrap();

    assert_eq!(report.stop_reason, StopReason::Stalled);
    assert_eq!(report.records.len(), 2);
    assert!((report.best_error - 0.15).abs() < 1e-9);
    assert_eq!(report.best_params, vec![0.2]);
}

#[test]
fn inactive_indices_are_dispatched_at_stable_values() {
    let dir = tempfile::tempdir().unwrap();

    let stable = vec![0.5, 0.01, 0.02, 0.03, 0.04];
    let seed_params = vec![
        vec![0.2, 0.01, 0.015, 0.03, 0.04],
        vec![0.5, 0.012, 0.02, 0.028, 0.04],
        vec![0.8, 0.009, 0.025, 0.03, 0.041],
        vec![0.4, 0.011, 0.018, 0.032, 0.039],
    ];
    let seed_features = vec![vec![0.2; 3], vec![0.5; 3], vec![0.8; 3], vec![0.4; 3]];

    let config = RunConfig::builder()
        .stable_params(stable.clone())
        .active_indices(vec![0, 2])
        .n_candidates(200)
        .n_iterations(2)
        .gp_max_iters(60)
        .seed(11)
        .build()
        .unwrap();

    let mut calibration = Calibration::builder()
        .config(config)
        .target(flat_target(0.35))
        .simulator(ScriptedSimulator::new(&dir, vec![Step::EchoParam]))
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let report = calibration.run().unwrap();

    for record in &report.records {
        assert_eq!(record.params.len(), 5);
        // Inactive indices 1, 3, 4 must carry the stable values.
        assert!((record.params[1] - stable[1]).abs() < 1e-15);
        assert!((record.params[3] - stable[3]).abs() < 1e-15);
        assert!((record.params[4] - stable[4]).abs() < 1e-15);
        // Active indices come back out of log space: strictly positive.
        assert!(record.params[0] > 0.0);
        assert!(record.params[2] > 0.0);
    }
}

#[test]
fn malformed_simulator_output_counts_as_simulation_failure() {
    // A simulator whose artifact is empty: feature extraction yields an
    // empty series, which must surface as a failed iteration, not a
    // fatal error.
    struct EmptyArtifact {
        dir: PathBuf,
    }
    impl Simulator for EmptyArtifact {
        fn run(&self, _params: &[f64]) -> Result<PathBuf, SimulationFailure> {
            let path = self.dir.join("empty.txt");
            std::fs::write(&path, "").map_err(|e| SimulationFailure::MalformedOutput {
                reason: e.to_string(),
            })?;
            Ok(path)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);

    let config = RunConfig::builder()
        .stable_params(vec![0.5])
        .active_indices(vec![0])
        .n_candidates(100)
        .n_iterations(2)
        .gp_max_iters(50)
        .retry_budget(5)
        .seed(13)
        .build()
        .unwrap();

    let mut calibration = Calibration::builder()
        .config(config)
        .target(flat_target(0.35))
        .simulator(EmptyArtifact {
            dir: dir.path().to_path_buf(),
        })
        .extractor(SeriesArtifactExtractor)
        .seed_parameters(seed_params)
        .seed_features(seed_features)
        .build()
        .unwrap();

    let report = calibration.run().unwrap();
    assert!(
        report
            .records
            .iter()
            .all(|r| r.outcome == IterationOutcome::SimulationFailed)
    );
    assert_eq!(report.n_evaluations, 3);
}

#[test]
fn reports_are_reproducible_for_a_fixed_seed() {
    let run = || {
        let dir = tempfile::tempdir().unwrap();
        let (seed_params, seed_features) = flat_seeds(&[0.2, 0.5, 0.8]);
        let mut calibration = Calibration::builder()
            .config(one_dim_config(3))
            .target(flat_target(0.35))
            .simulator(ScriptedSimulator::new(&dir, vec![Step::EchoParam]))
            .extractor(SeriesArtifactExtractor)
            .seed_parameters(seed_params)
            .seed_features(seed_features)
            .build()
            .unwrap();
        calibration.run().unwrap()
    };

    let a = run();
    let b = run();
    assert_eq!(a.best_params, b.best_params);
    assert!((a.best_error - b.best_error).abs() < 1e-12);
    let params_a: Vec<_> = a.records.iter().map(|r| r.params.clone()).collect();
    let params_b: Vec<_> = b.records.iter().map(|r| r.params.clone()).collect();
    assert_eq!(params_a, params_b);
}
