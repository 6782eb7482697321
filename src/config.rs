//! Run configuration for a calibration.
//!
//! Everything a run needs travels in one explicit [`RunConfig`] value —
//! no module-level state, no ambient paths. Construct it once at
//! startup via the builder and pass it into the calibration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::surrogate::GpOptimizer;

/// Parameters of a calibration run.
///
/// # Examples
///
/// ```
/// use calibrator::config::RunConfig;
///
/// let config = RunConfig::builder()
///     .stable_params(vec![0.5, 0.01, 0.01, 0.01, 0.01])
///     .active_indices(vec![0, 1, 2, 3, 4])
///     .n_iterations(10)
///     .exploration(0.05)
///     .seed(42)
///     .build()
///     .unwrap();
/// assert_eq!(config.n_candidates, 100_000);
/// ```
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Which columns of the full parameter vector are actively
    /// calibrated, in surrogate-input order.
    pub active_indices: Vec<usize>,
    /// The full-dimension parameter vector holding every inactive index
    /// at its fixed value. Its length defines the full dimension.
    pub stable_params: Vec<f64>,
    /// Candidate pool size per acquisition sweep.
    pub n_candidates: usize,
    /// Iteration budget for the optimization loop.
    pub n_iterations: usize,
    /// Exploration coefficient κ of the default UCB acquisition.
    pub exploration: f64,
    /// Iteration cap for the GP marginal-likelihood fit.
    pub gp_max_iters: usize,
    /// Gradient tolerance ending the GP fit early.
    pub gp_tolerance: f64,
    /// Optimizer for the GP fit.
    pub gp_optimizer: GpOptimizer,
    /// Observation noise variance / Cholesky jitter floor.
    pub noise_variance: f64,
    /// Wall-clock budget for one simulator invocation.
    pub simulation_timeout: Duration,
    /// How many simulation failures the run tolerates before giving up.
    pub retry_budget: usize,
    /// Stop after this many successful iterations without improving the
    /// best error. `None` disables the check.
    pub patience: Option<usize>,
    /// Cap on how many seed rows enter the training set. `None` uses
    /// all of them.
    pub train_limit: Option<usize>,
    /// Seed for candidate sampling.
    pub seed: u64,
}

impl RunConfig {
    /// Creates a builder pre-loaded with defaults.
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// The full parameter dimension.
    #[must_use]
    pub fn full_dim(&self) -> usize {
        self.stable_params.len()
    }

    /// The number of actively calibrated parameters.
    #[must_use]
    pub fn active_dim(&self) -> usize {
        self.active_indices.len()
    }

    fn validate(&self) -> Result<()> {
        if self.stable_params.is_empty() {
            return Err(invalid("stable_params must not be empty"));
        }
        if self.active_indices.is_empty() {
            return Err(invalid("at least one parameter index must be active"));
        }
        for &index in &self.active_indices {
            if index >= self.full_dim() {
                return Err(Error::IndexOutOfRange {
                    index,
                    width: self.full_dim(),
                });
            }
        }
        let mut seen = self.active_indices.clone();
        seen.sort_unstable();
        if seen.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid("active_indices contains duplicates"));
        }
        if self.n_candidates < 1 {
            return Err(invalid("n_candidates must be at least 1"));
        }
        if self.n_iterations < 1 {
            return Err(invalid("n_iterations must be at least 1"));
        }
        if !self.exploration.is_finite() || self.exploration < 0.0 {
            return Err(invalid("exploration must be finite and non-negative"));
        }
        if !self.noise_variance.is_finite() || self.noise_variance <= 0.0 {
            return Err(invalid("noise_variance must be finite and positive"));
        }
        if self.patience == Some(0) {
            return Err(invalid("patience must be at least 1 when set"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidConfig {
        reason: reason.to_string(),
    }
}

/// Builder for [`RunConfig`].
///
/// Defaults: five parameters with stable values
/// `[0.5, 0.01, 0.01, 0.01, 0.01]`, all active, 100 000 candidates,
/// 25 iterations, κ = 0.05, Adam with a 5000-iteration cap, 5-minute
/// simulator timeout, retry budget 3.
#[derive(Clone, Debug)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            config: RunConfig {
                active_indices: vec![0, 1, 2, 3, 4],
                stable_params: vec![0.5, 0.01, 0.01, 0.01, 0.01],
                n_candidates: 100_000,
                n_iterations: 25,
                exploration: 0.05,
                gp_max_iters: 5000,
                gp_tolerance: 1e-6,
                gp_optimizer: GpOptimizer::Adam,
                noise_variance: 1e-6,
                simulation_timeout: Duration::from_secs(300),
                retry_budget: 3,
                patience: None,
                train_limit: None,
                seed: 0,
            },
        }
    }
}

impl RunConfigBuilder {
    /// Sets the actively calibrated parameter indices.
    #[must_use]
    pub fn active_indices(mut self, indices: Vec<usize>) -> Self {
        self.config.active_indices = indices;
        self
    }

    /// Sets the full-dimension stable parameter values.
    #[must_use]
    pub fn stable_params(mut self, params: Vec<f64>) -> Self {
        self.config.stable_params = params;
        self
    }

    /// Sets the acquisition candidate pool size.
    #[must_use]
    pub fn n_candidates(mut self, n: usize) -> Self {
        self.config.n_candidates = n;
        self
    }

    /// Sets the iteration budget.
    #[must_use]
    pub fn n_iterations(mut self, n: usize) -> Self {
        self.config.n_iterations = n;
        self
    }

    /// Sets the exploration coefficient κ.
    #[must_use]
    pub fn exploration(mut self, kappa: f64) -> Self {
        self.config.exploration = kappa;
        self
    }

    /// Sets the GP fit iteration cap.
    #[must_use]
    pub fn gp_max_iters(mut self, n: usize) -> Self {
        self.config.gp_max_iters = n;
        self
    }

    /// Sets the GP fit gradient tolerance.
    #[must_use]
    pub fn gp_tolerance(mut self, tol: f64) -> Self {
        self.config.gp_tolerance = tol;
        self
    }

    /// Selects the GP hyperparameter optimizer.
    #[must_use]
    pub fn gp_optimizer(mut self, optimizer: GpOptimizer) -> Self {
        self.config.gp_optimizer = optimizer;
        self
    }

    /// Sets the observation noise variance.
    #[must_use]
    pub fn noise_variance(mut self, v: f64) -> Self {
        self.config.noise_variance = v;
        self
    }

    /// Sets the per-invocation simulator timeout.
    #[must_use]
    pub fn simulation_timeout(mut self, timeout: Duration) -> Self {
        self.config.simulation_timeout = timeout;
        self
    }

    /// Sets the simulation retry budget.
    #[must_use]
    pub fn retry_budget(mut self, budget: usize) -> Self {
        self.config.retry_budget = budget;
        self
    }

    /// Stops the run after `window` successful iterations without a new
    /// best error.
    #[must_use]
    pub fn patience(mut self, window: usize) -> Self {
        self.config.patience = Some(window);
        self
    }

    /// Caps the number of seed rows used for training.
    #[must_use]
    pub fn train_limit(mut self, limit: usize) -> Self {
        self.config.train_limit = Some(limit);
        self
    }

    /// Sets the sampling seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] or [`Error::IndexOutOfRange`]
    /// describing the first violated constraint.
    pub fn build(self) -> Result<RunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
