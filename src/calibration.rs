//! The Bayesian-optimization calibration loop.
//!
//! [`Calibration`] ties the pieces together: it seeds a training set
//! from historical simulations, fits the Gaussian-process surrogate,
//! and then iterates sample → score → dispatch → await → update until
//! the iteration budget or the patience window ends the run. Each
//! iteration is strictly sequential — the surrogate must absorb the
//! previous result before the next candidate sweep — and all mutation
//! happens in the updating step.
//!
//! A failed simulation does not abort the run: the iteration is
//! recorded as failed, nothing is appended to the training set, and the
//! loop continues until failures exceed the retry budget. The
//! accumulated records and the best-known parameter set stay on the
//! struct, so even a fatal mid-run error never discards progress.
//!
//! # Examples
//!
//! ```
//! use std::path::PathBuf;
//!
//! use calibrator::calibration::Calibration;
//! use calibrator::config::RunConfig;
//! use calibrator::error::SimulationFailure;
//! use calibrator::simulator::{SeriesArtifactExtractor, Simulator};
//! use calibrator::target::{TargetSource, TimeSeries};
//!
//! // Toy "solver": a flat line at its single parameter value.
//! struct FlatLine {
//!     dir: PathBuf,
//! }
//!
//! impl Simulator for FlatLine {
//!     fn run(&self, params: &[f64]) -> Result<PathBuf, SimulationFailure> {
//!         let path = self.dir.join("out.txt");
//!         let body: String = (0..3).map(|t| format!("{t} {}\n", params[0])).collect();
//!         std::fs::write(&path, body).map_err(|e| SimulationFailure::MalformedOutput {
//!             reason: e.to_string(),
//!         })?;
//!         Ok(path)
//!     }
//! }
//!
//! let dir = tempfile::tempdir().unwrap();
//! let target = TimeSeries::new(vec![0.0, 1.0, 2.0], vec![0.35, 0.35, 0.35]).unwrap();
//!
//! let config = RunConfig::builder()
//!     .stable_params(vec![0.5])
//!     .active_indices(vec![0])
//!     .n_candidates(200)
//!     .n_iterations(3)
//!     .gp_max_iters(100)
//!     .seed(7)
//!     .build()
//!     .unwrap();
//!
//! let mut calibration = Calibration::builder()
//!     .config(config)
//!     .target(TargetSource::Synthetic(target))
//!     .simulator(FlatLine { dir: dir.path().to_path_buf() })
//!     .extractor(SeriesArtifactExtractor)
//!     .seed_parameters(vec![vec![0.2], vec![0.5], vec![0.8]])
//!     .seed_features(vec![vec![0.2; 3], vec![0.5; 3], vec![0.8; 3]])
//!     .build()
//!     .unwrap();
//!
//! let report = calibration.run().unwrap();
//! // The best seed sits at error 0.15; iterations can only improve on it.
//! assert!(report.best_error <= 0.15 + 1e-9);
//! assert_eq!(report.records.len(), 3);
//! ```

use std::path::Path;

use crate::acquisition::{Acquisition, UpperConfidenceBound, select_best};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::metrics::{rmse, rmse_aligned};
use crate::preprocess::{Standardizer, column_bounds, load_matrix, log_transform, select_columns};
use crate::sampling::LatinHypercube;
use crate::simulator::{FeatureExtractor, Simulator};
use crate::surrogate::{FittedGp, GaussianProcess};
use crate::target::{TargetSource, TimeSeries};

/// Where the loop currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Seed data loaded and surrogate fitted; no iteration run yet.
    Initializing,
    /// Generating the candidate pool.
    Sampling,
    /// Scoring candidates under the surrogate posterior.
    Scoring,
    /// Converting the chosen candidate for the external solver.
    Dispatching,
    /// Blocking on the external solver and feature extraction.
    AwaitingResult,
    /// Appending the observation and refitting the surrogate.
    Updating,
    /// Terminated successfully.
    Converged,
    /// Terminated by a fatal failure.
    Failed,
}

/// Why a successful run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    /// The iteration budget was spent.
    IterationBudget,
    /// The best error saw no improvement for the patience window.
    Stalled,
}

/// Outcome of a single iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IterationOutcome {
    /// The simulation succeeded and the observation was absorbed.
    Completed,
    /// The simulator failed; nothing was appended.
    SimulationFailed,
}

/// Append-only log entry, one per iteration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterationRecord {
    /// Zero-based iteration index.
    pub iteration: usize,
    /// The dispatched raw, full-dimension parameter set.
    pub params: Vec<f64>,
    /// The observed RMSE, or `None` when the simulation failed.
    pub error: Option<f64>,
    /// Best RMSE known after this iteration.
    pub best_error: f64,
    /// How the iteration ended.
    pub outcome: IterationOutcome,
}

/// Final result of a calibration run.
///
/// Always carries the best-known parameter set and its error, whatever
/// ended the run.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationReport {
    /// What ended the run.
    pub stop_reason: StopReason,
    /// The best raw, full-dimension parameter set found.
    pub best_params: Vec<f64>,
    /// The RMSE of the best parameter set.
    pub best_error: f64,
    /// Training-set size at the end of the run.
    pub n_evaluations: usize,
    /// The per-iteration log.
    pub records: Vec<IterationRecord>,
}

/// Drives the calibration: owns the training set, the normalization
/// state, the surrogate, and the injected collaborators.
///
/// Create via [`Calibration::builder`]; construction performs the
/// initialization phase (seed preprocessing, normalization fitting, the
/// first surrogate fit), so a freshly built value is ready to
/// [`run`](Calibration::run).
pub struct Calibration {
    config: RunConfig,
    target: TimeSeries,
    simulator: Box<dyn Simulator>,
    extractor: Box<dyn FeatureExtractor>,
    acquisition: Box<dyn Acquisition>,
    sampler: LatinHypercube,
    gp: GaussianProcess,
    standardizer: Standardizer,
    /// Candidate-sampling bounds: observed min/max of the standardized
    /// seed inputs, fixed for the run.
    bounds: Vec<(f64, f64)>,
    /// Standardized active-parameter rows, index-aligned with
    /// `y_train` and `raw_sets`. Grows monotonically.
    x_train: Vec<Vec<f64>>,
    /// Negated RMSE per training row (the maximization frame).
    y_train: Vec<f64>,
    /// Raw full-dimension parameter sets, one per training row.
    raw_sets: Vec<Vec<f64>>,
    fitted: FittedGp,
    records: Vec<IterationRecord>,
    phase: Phase,
    best_index: usize,
}

impl std::fmt::Debug for Calibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibration")
            .field("config", &self.config)
            .field("target", &self.target)
            .field("gp", &self.gp)
            .field("standardizer", &self.standardizer)
            .field("bounds", &self.bounds)
            .field("x_train", &self.x_train)
            .field("y_train", &self.y_train)
            .field("raw_sets", &self.raw_sets)
            .field("fitted", &self.fitted)
            .field("records", &self.records)
            .field("phase", &self.phase)
            .field("best_index", &self.best_index)
            .finish_non_exhaustive()
    }
}

impl Calibration {
    /// Creates a builder for assembling a calibration.
    #[must_use]
    pub fn builder() -> CalibrationBuilder {
        CalibrationBuilder::default()
    }

    /// Runs the loop until the iteration budget, the patience window,
    /// or a fatal failure ends it.
    ///
    /// # Errors
    ///
    /// - [`Error::RetryBudgetExhausted`] when simulation failures exceed
    ///   the configured budget.
    /// - Surrogate fit errors when refitting after a new observation
    ///   fails.
    ///
    /// On error the accumulated [`records`](Calibration::records) and
    /// the best-known [`best_params`](Calibration::best_params) remain
    /// available on the struct — progress is never discarded.
    pub fn run(&mut self) -> Result<CalibrationReport> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "calibrate",
            n_iterations = self.config.n_iterations,
            n_candidates = self.config.n_candidates
        )
        .entered();

        let mut failures = 0_usize;
        let mut stalled = 0_usize;
        let mut stop_reason = StopReason::IterationBudget;

        for iteration in 0..self.config.n_iterations {
            self.phase = Phase::Sampling;
            let candidates = self
                .sampler
                .generate(self.config.n_candidates, &self.bounds)?;

            self.phase = Phase::Scoring;
            let (means, stds) = self.fitted.predict(&candidates)?;
            let scores = self
                .acquisition
                .score(&means, &stds, self.fitted.best_observed());
            let chosen = select_best(&scores)?;

            self.phase = Phase::Dispatching;
            let candidate = candidates[chosen].clone();
            let raw = self.to_raw(&candidate);

            self.phase = Phase::AwaitingResult;
            match self.evaluate(&raw) {
                Ok(error) => {
                    self.phase = Phase::Updating;
                    let improved = error < self.best_error();
                    self.x_train.push(candidate);
                    self.y_train.push(-error);
                    self.raw_sets.push(raw.clone());
                    if improved {
                        self.best_index = self.x_train.len() - 1;
                    }

                    match self.gp.fit(&self.x_train, &self.y_train) {
                        Ok(fitted) => self.fitted = fitted,
                        Err(refit_error) => {
                            self.records.push(IterationRecord {
                                iteration,
                                params: raw,
                                error: Some(error),
                                best_error: self.best_error(),
                                outcome: IterationOutcome::Completed,
                            });
                            self.phase = Phase::Failed;
                            return Err(refit_error);
                        }
                    }

                    self.records.push(IterationRecord {
                        iteration,
                        params: raw,
                        error: Some(error),
                        best_error: self.best_error(),
                        outcome: IterationOutcome::Completed,
                    });
                    trace_info!(iteration, error, improved, "iteration completed");

                    if improved {
                        stalled = 0;
                    } else {
                        stalled += 1;
                    }
                    if let Some(patience) = self.config.patience {
                        if stalled >= patience {
                            stop_reason = StopReason::Stalled;
                            break;
                        }
                    }
                }
                Err(Error::Simulation(_failure)) => {
                    failures += 1;
                    self.records.push(IterationRecord {
                        iteration,
                        params: raw,
                        error: None,
                        best_error: self.best_error(),
                        outcome: IterationOutcome::SimulationFailed,
                    });
                    trace_debug!(iteration, failure = %_failure, "simulation failed");

                    if failures > self.config.retry_budget {
                        self.phase = Phase::Failed;
                        return Err(Error::RetryBudgetExhausted {
                            budget: self.config.retry_budget,
                            failures,
                        });
                    }
                }
                Err(fatal) => {
                    self.phase = Phase::Failed;
                    return Err(fatal);
                }
            }
        }

        self.phase = Phase::Converged;
        trace_info!(best_error = self.best_error(), "calibration converged");
        Ok(CalibrationReport {
            stop_reason,
            best_params: self.best_params().to_vec(),
            best_error: self.best_error(),
            n_evaluations: self.x_train.len(),
            records: self.records.clone(),
        })
    }

    /// The best (lowest) RMSE observed so far.
    #[must_use]
    pub fn best_error(&self) -> f64 {
        -self.y_train[self.best_index]
    }

    /// The raw parameter set behind [`best_error`](Calibration::best_error).
    #[must_use]
    pub fn best_params(&self) -> &[f64] {
        &self.raw_sets[self.best_index]
    }

    /// The append-only iteration log.
    #[must_use]
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// The current training-set size.
    #[must_use]
    pub fn n_training_points(&self) -> usize {
        self.x_train.len()
    }

    /// The loop's current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Maps a standardized active-parameter candidate back to the raw,
    /// full-dimension vector the solver expects: inverse-standardize,
    /// undo the log transform, and merge with the stable values at
    /// inactive indices.
    fn to_raw(&self, standardized: &[f64]) -> Vec<f64> {
        let log_space = self.standardizer.inverse_transform_row(standardized);
        let mut raw = self.config.stable_params.clone();
        for (&index, &value) in self.config.active_indices.iter().zip(&log_space) {
            raw[index] = value.exp();
        }
        raw
    }

    /// One simulator round-trip: run, extract, score against the target.
    ///
    /// An artifact too empty to score is a simulation failure, not a
    /// fatal error — the loop treats it like any other failed run.
    fn evaluate(&self, raw: &[f64]) -> Result<f64> {
        let artifact = self.simulator.run(raw)?;
        let series = self.extractor.extract(&artifact)?;
        match rmse(&self.target, &series) {
            Err(Error::InsufficientData { reason }) => Err(Error::Simulation(
                crate::error::SimulationFailure::MalformedOutput {
                    reason: reason.to_string(),
                },
            )),
            other => other,
        }
    }
}

/// Builder assembling a [`Calibration`].
///
/// Requires a target, a simulator, an extractor, and seed data; the
/// configuration defaults to [`RunConfig::builder`] defaults and the
/// acquisition to [`UpperConfidenceBound`] with the configured κ.
#[derive(Default)]
pub struct CalibrationBuilder {
    config: Option<RunConfig>,
    target: Option<TargetSource>,
    simulator: Option<Box<dyn Simulator>>,
    extractor: Option<Box<dyn FeatureExtractor>>,
    acquisition: Option<Box<dyn Acquisition>>,
    seed_parameters: Option<Vec<Vec<f64>>>,
    seed_features: Option<Vec<Vec<f64>>>,
}

impl CalibrationBuilder {
    /// Sets the run configuration.
    #[must_use]
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets where the calibration target comes from.
    #[must_use]
    pub fn target(mut self, target: TargetSource) -> Self {
        self.target = Some(target);
        self
    }

    /// Injects the simulator collaborator.
    #[must_use]
    pub fn simulator(mut self, simulator: impl Simulator + 'static) -> Self {
        self.simulator = Some(Box::new(simulator));
        self
    }

    /// Injects the feature-extractor collaborator.
    #[must_use]
    pub fn extractor(mut self, extractor: impl FeatureExtractor + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Overrides the acquisition rule.
    ///
    /// Defaults to [`UpperConfidenceBound`] with the configured
    /// exploration coefficient.
    #[must_use]
    pub fn acquisition(mut self, acquisition: impl Acquisition + 'static) -> Self {
        self.acquisition = Some(Box::new(acquisition));
        self
    }

    /// Sets the seed parameter matrix (one raw full-dimension row per
    /// historical simulation).
    #[must_use]
    pub fn seed_parameters(mut self, rows: Vec<Vec<f64>>) -> Self {
        self.seed_parameters = Some(rows);
        self
    }

    /// Sets the seed feature matrix (one simulated value series per
    /// historical simulation, aligned with the target grid).
    #[must_use]
    pub fn seed_features(mut self, rows: Vec<Vec<f64>>) -> Self {
        self.seed_features = Some(rows);
        self
    }

    /// Loads both seed matrices from persisted whitespace-delimited
    /// numeric files: the parameter matrix and the feature matrix the
    /// historical pipeline wrote out.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::preprocess::load_matrix`] errors for either
    /// file.
    pub fn seed_files(self, parameters: &Path, features: &Path) -> Result<Self> {
        let params = load_matrix(parameters)?;
        let feats = load_matrix(features)?;
        Ok(self.seed_parameters(params).seed_features(feats))
    }

    /// Performs the initialization phase and returns a ready-to-run
    /// [`Calibration`].
    ///
    /// Loads the target, scores every seed row against it, fits the
    /// normalization state and the initial surrogate. Any failure here
    /// is fatal: the run cannot start without valid seed data, bounds,
    /// and surrogate.
    ///
    /// # Errors
    ///
    /// Propagates target loading, preprocessing, metric, and surrogate
    /// fit errors; missing builder inputs surface as
    /// [`Error::InvalidConfig`].
    pub fn build(self) -> Result<Calibration> {
        let config = match self.config {
            Some(config) => config,
            None => RunConfig::builder().build()?,
        };
        let target_source = self.target.ok_or_else(|| missing("target"))?;
        let simulator = self.simulator.ok_or_else(|| missing("simulator"))?;
        let extractor = self.extractor.ok_or_else(|| missing("extractor"))?;
        let seed_parameters = self.seed_parameters.ok_or_else(|| missing("seed_parameters"))?;
        let seed_features = self.seed_features.ok_or_else(|| missing("seed_features"))?;
        let acquisition = self
            .acquisition
            .unwrap_or_else(|| Box::new(UpperConfidenceBound::new(config.exploration)));

        if seed_parameters.len() != seed_features.len() {
            return Err(Error::TrainingLengthMismatch {
                x_rows: seed_parameters.len(),
                y_rows: seed_features.len(),
            });
        }

        let limit = config.train_limit.unwrap_or(usize::MAX);
        let raw_sets: Vec<Vec<f64>> = seed_parameters.into_iter().take(limit).collect();
        let features: Vec<Vec<f64>> = seed_features.into_iter().take(limit).collect();

        let Some(first) = raw_sets.first() else {
            return Err(Error::InsufficientData {
                reason: "no seed simulations to train on",
            });
        };
        if first.len() != config.full_dim() {
            return Err(Error::DimensionMismatch {
                expected: config.full_dim(),
                got: first.len(),
                row: 0,
            });
        }

        let target = target_source.load()?;

        // Seed targets: positive RMSE per historical simulation, negated
        // into the maximization frame the surrogate trains on.
        let mut y_train = Vec::with_capacity(features.len());
        for row in &features {
            y_train.push(-rmse_aligned(&target.values, row)?);
        }

        let log_rows = log_transform(&raw_sets)?;
        let active = select_columns(&log_rows, &config.active_indices)?;
        let standardizer = Standardizer::fit(&active)?;
        let x_train = standardizer.transform(&active)?;
        let bounds = column_bounds(&x_train);

        let gp = GaussianProcess::builder()
            .noise_variance(config.noise_variance)
            .max_iters(config.gp_max_iters)
            .tolerance(config.gp_tolerance)
            .optimizer(config.gp_optimizer)
            .build();
        let fitted = gp.fit(&x_train, &y_train)?;

        // First occurrence wins ties, the same rule candidate selection uses.
        let mut best_index = 0;
        for (index, &value) in y_train.iter().enumerate() {
            if value > y_train[best_index] {
                best_index = index;
            }
        }

        let sampler = LatinHypercube::with_seed(config.seed);

        #[cfg(feature = "tracing")]
        let seed_best = -y_train[best_index];
        trace_info!(
            n_seed = x_train.len(),
            best_error = seed_best,
            "calibration initialized"
        );

        Ok(Calibration {
            config,
            target,
            simulator,
            extractor,
            acquisition,
            sampler,
            gp,
            standardizer,
            bounds,
            x_train,
            y_train,
            raw_sets,
            fitted,
            records: Vec::new(),
            phase: Phase::Initializing,
            best_index,
        })
    }
}

fn missing(what: &str) -> Error {
    Error::InvalidConfig {
        reason: format!("calibration builder is missing {what}"),
    }
}
