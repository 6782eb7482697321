//! Gaussian-process surrogate over (parameters → observed error).
//!
//! [`GaussianProcess`] holds the fit configuration; [`fit`](GaussianProcess::fit)
//! produces an immutable [`FittedGp`] snapshot. The calibration loop
//! replaces the snapshot wholesale after each new observation — fitted
//! state is never mutated in place.
//!
//! # Model
//!
//! A Matérn 5/2 kernel with ARD lengthscales over standardized inputs.
//! Kernel hyperparameters (log lengthscales, log signal variance) are
//! fitted by maximizing the log marginal likelihood with analytic
//! gradients, using either a first-order adaptive method (Adam, the
//! default) or quasi-Newton BFGS — bounded by an iteration cap and a
//! gradient tolerance. Training targets are standardized internally and
//! predictions are mapped back to the original scale on the way out.
//!
//! Observation noise is not learned; it doubles as the Cholesky jitter
//! floor and escalates a bounded number of times before the fit fails.
//!
//! # Examples
//!
//! ```
//! use calibrator::surrogate::GaussianProcess;
//!
//! let x = vec![vec![0.0], vec![0.5], vec![1.0], vec![1.5]];
//! let y = vec![0.0, 0.25, 1.0, 2.25];
//!
//! let gp = GaussianProcess::builder().max_iters(100).build();
//! let fitted = gp.fit(&x, &y).unwrap();
//!
//! let (mean, std) = fitted.predict_one(&[0.75]).unwrap();
//! assert!(std >= 0.0);
//! assert!((mean - 0.5625).abs() < 0.5);
//! ```

mod hyperopt;
mod kernel;

use nalgebra::DVector;

use crate::error::{Error, Result};

use hyperopt::Likelihood;
use kernel::{cross_kernel, kernel_matrix};

/// Default cap on marginal-likelihood optimization iterations.
const DEFAULT_MAX_ITERS: usize = 5000;
/// Default gradient-norm convergence tolerance.
const DEFAULT_TOLERANCE: f64 = 1e-6;
/// Default observation noise variance, also the initial Cholesky jitter.
const DEFAULT_NOISE_VAR: f64 = 1e-6;
/// How many times the diagonal jitter is multiplied by 10 before the
/// fit gives up with [`Error::SingularKernel`].
const MAX_JITTER_ESCALATIONS: usize = 6;
/// Candidates are pushed through prediction in blocks of this size so
/// 100k-point pools do not materialize a full cross-kernel matrix.
const PREDICT_BLOCK: usize = 512;

/// Gradient-based optimizer used for the marginal-likelihood fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GpOptimizer {
    /// First-order adaptive gradient ascent (the default).
    Adam,
    /// Quasi-Newton ascent with backtracking line search.
    Bfgs,
}

/// Configuration for fitting a Gaussian-process surrogate.
///
/// Construct via [`builder`](GaussianProcess::builder) or use
/// [`Default`]. Fitting is deterministic: identical data and settings
/// produce identical predictions.
#[derive(Clone, Debug)]
pub struct GaussianProcess {
    noise_variance: f64,
    max_iters: usize,
    tolerance: f64,
    optimizer: GpOptimizer,
}

impl GaussianProcess {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            noise_variance: DEFAULT_NOISE_VAR,
            max_iters: DEFAULT_MAX_ITERS,
            tolerance: DEFAULT_TOLERANCE,
            optimizer: GpOptimizer::Adam,
        }
    }

    /// Creates a builder for configuring a [`GaussianProcess`].
    #[must_use]
    pub fn builder() -> GaussianProcessBuilder {
        GaussianProcessBuilder::default()
    }

    /// Fits the surrogate to standardized inputs `x` and targets `y`.
    ///
    /// # Errors
    ///
    /// - [`Error::TrainingLengthMismatch`] if `x` and `y` differ in length.
    /// - [`Error::DimensionMismatch`] for ragged input rows.
    /// - [`Error::InsufficientTrainingPoints`] for fewer than 2 distinct
    ///   input rows.
    /// - [`Error::SingularKernel`] if the kernel matrix stays
    ///   non-positive-definite after jitter escalation.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Result<FittedGp> {
        if x.len() != y.len() {
            return Err(Error::TrainingLengthMismatch {
                x_rows: x.len(),
                y_rows: y.len(),
            });
        }
        let dim = x.first().map_or(0, Vec::len);
        for (row_idx, row) in x.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                    row: row_idx,
                });
            }
        }
        let distinct = count_distinct(x);
        if distinct < 2 {
            return Err(Error::InsufficientTrainingPoints { distinct });
        }

        let n = y.len();
        let y_mean = y.iter().sum::<f64>() / n as f64;
        let y_var = y.iter().map(|&v| (v - y_mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let y_std = y_var.sqrt().max(1e-10);
        let y_standardized: Vec<f64> = y.iter().map(|&v| (v - y_mean) / y_std).collect();

        // Initialize log lengthscales from per-dimension spread, the same
        // heuristic the optimizer then refines.
        let mut theta0: Vec<f64> = (0..dim)
            .map(|j| {
                let mean_j = x.iter().map(|row| row[j]).sum::<f64>() / n as f64;
                let var_j = x.iter().map(|row| (row[j] - mean_j).powi(2)).sum::<f64>() / n as f64;
                var_j.sqrt().max(0.01).ln()
            })
            .collect();
        theta0.push(0.0);

        let likelihood = Likelihood::new(x, &y_standardized, self.noise_variance);
        let theta = match self.optimizer {
            GpOptimizer::Adam => {
                hyperopt::adam_maximize(&likelihood, theta0, self.max_iters, self.tolerance)
            }
            GpOptimizer::Bfgs => {
                hyperopt::bfgs_maximize(&likelihood, theta0, self.max_iters, self.tolerance)
            }
        };
        let lengthscales: Vec<f64> = theta[..likelihood.dim()].iter().map(|&t| t.exp()).collect();
        let signal_var = theta[likelihood.dim()].exp();

        let mut jitter = self.noise_variance;
        let mut cholesky = None;
        for _ in 0..=MAX_JITTER_ESCALATIONS {
            let k = kernel_matrix(x, &lengthscales, signal_var, jitter);
            if let Some(chol) = nalgebra::linalg::Cholesky::new(k) {
                cholesky = Some(chol);
                break;
            }
            jitter *= 10.0;
        }
        let Some(cholesky) = cholesky else {
            return Err(Error::SingularKernel { jitter });
        };

        let y_vec = DVector::from_column_slice(&y_standardized);
        let alpha = cholesky.solve(&y_vec);
        let best_observed = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(FittedGp {
            x_train: x.to_vec(),
            lengthscales,
            signal_var,
            cholesky,
            alpha,
            y_mean,
            y_std,
            best_observed,
        })
    }
}

impl Default for GaussianProcess {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring a [`GaussianProcess`].
///
/// Defaults: Adam optimizer, 5000 iterations, 1e-6 tolerance, 1e-6 noise.
#[derive(Clone, Debug)]
pub struct GaussianProcessBuilder {
    noise_variance: f64,
    max_iters: usize,
    tolerance: f64,
    optimizer: GpOptimizer,
}

impl Default for GaussianProcessBuilder {
    fn default() -> Self {
        let base = GaussianProcess::new();
        Self {
            noise_variance: base.noise_variance,
            max_iters: base.max_iters,
            tolerance: base.tolerance,
            optimizer: base.optimizer,
        }
    }
}

impl GaussianProcessBuilder {
    /// Sets the observation noise variance added to the kernel diagonal.
    #[must_use]
    pub fn noise_variance(mut self, v: f64) -> Self {
        self.noise_variance = v;
        self
    }

    /// Sets the cap on marginal-likelihood optimization iterations.
    #[must_use]
    pub fn max_iters(mut self, n: usize) -> Self {
        self.max_iters = n;
        self
    }

    /// Sets the gradient-norm tolerance that ends the fit early.
    #[must_use]
    pub fn tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// Selects the hyperparameter optimizer.
    #[must_use]
    pub fn optimizer(mut self, optimizer: GpOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Builds the configured [`GaussianProcess`].
    #[must_use]
    pub fn build(self) -> GaussianProcess {
        GaussianProcess {
            noise_variance: self.noise_variance,
            max_iters: self.max_iters,
            tolerance: self.tolerance,
            optimizer: self.optimizer,
        }
    }
}

/// An immutable fitted surrogate ready for posterior prediction.
///
/// Produced by [`GaussianProcess::fit`]; prediction is read-only.
#[derive(Debug)]
pub struct FittedGp {
    /// Training inputs, one standardized row per observation.
    x_train: Vec<Vec<f64>>,
    /// Learned ARD lengthscales.
    lengthscales: Vec<f64>,
    /// Learned signal variance.
    signal_var: f64,
    /// Cholesky factor of K + σ²I.
    cholesky: nalgebra::linalg::Cholesky<f64, nalgebra::Dyn>,
    /// α = (K + σ²I)⁻¹ y in standardized target space.
    alpha: DVector<f64>,
    /// Mean of the raw targets, for un-standardization.
    y_mean: f64,
    /// Std of the raw targets, for un-standardization.
    y_std: f64,
    /// Largest raw target seen during fitting (the incumbent in the
    /// maximization frame).
    best_observed: f64,
}

impl FittedGp {
    /// Posterior mean and standard deviation for a block of candidates.
    ///
    /// Works in blocks internally, so pools of 100 000 candidates never
    /// materialize a full cross-kernel matrix. Defined for any
    /// finite-valued candidate; the returned standard deviation is
    /// clamped at 0 and grows away from the training support.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if a candidate's width
    /// differs from the training dimension.
    pub fn predict(&self, candidates: &[Vec<f64>]) -> Result<(Vec<f64>, Vec<f64>)> {
        let dim = self.dim();
        for (row_idx, row) in candidates.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                    row: row_idx,
                });
            }
        }

        let mut means = Vec::with_capacity(candidates.len());
        let mut stds = Vec::with_capacity(candidates.len());

        for block in candidates.chunks(PREDICT_BLOCK) {
            let k_cross = cross_kernel(block, &self.x_train, &self.lengthscales, self.signal_var);
            // Mean: k* α. Variance: k(x*,x*) - k*ᵀ (K + σ²I)⁻¹ k*.
            let mean_standardized = &k_cross * &self.alpha;
            let solved = self.cholesky.solve(&k_cross.transpose());
            for i in 0..block.len() {
                let reduction = (k_cross.row(i) * solved.column(i))[(0, 0)];
                let var = (self.signal_var - reduction).max(0.0);
                means.push(self.y_mean + self.y_std * mean_standardized[i]);
                stds.push(var.sqrt() * self.y_std);
            }
        }

        Ok((means, stds))
    }

    /// Posterior mean and standard deviation at a single point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] for a wrong-width input.
    pub fn predict_one(&self, x: &[f64]) -> Result<(f64, f64)> {
        let row = x.to_vec();
        let (means, stds) = self.predict(core::slice::from_ref(&row))?;
        Ok((means[0], stds[0]))
    }

    /// The training input dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.lengthscales.len()
    }

    /// The number of training observations.
    #[must_use]
    pub fn n_train(&self) -> usize {
        self.x_train.len()
    }

    /// The largest training target — the incumbent for acquisition rules
    /// that need one.
    #[must_use]
    pub fn best_observed(&self) -> f64 {
        self.best_observed
    }
}

/// Count distinct rows by exact comparison. Training sets are small
/// enough that the quadratic scan does not matter.
fn count_distinct(x: &[Vec<f64>]) -> usize {
    let mut distinct: Vec<&Vec<f64>> = Vec::new();
    for row in x {
        if !distinct.iter().any(|&seen| seen == row) {
            distinct.push(row);
        }
    }
    distinct.len()
}
