//! Acquisition rules for picking the next candidate to simulate.
//!
//! Scores are computed in the **maximization frame**: training targets
//! are negated errors, so a higher posterior mean predicts a lower
//! simulation error. The rule itself is pluggable via [`Acquisition`];
//! the calibration loop defaults to [`UpperConfidenceBound`], whose
//! exploration coefficient is the run's `exploration` knob.
//!
//! # Examples
//!
//! ```
//! use calibrator::acquisition::{Acquisition, UpperConfidenceBound, select_best};
//!
//! let ucb = UpperConfidenceBound::new(0.05);
//! let scores = ucb.score(&[-1.0, -0.4, -0.6], &[0.1, 0.2, 3.0], 0.0);
//! let best = select_best(&scores).unwrap();
//! assert_eq!(best, 1);
//! ```

use crate::error::{Error, Result};

/// Strategy scoring posterior summaries, higher is better.
///
/// `incumbent` is the best (largest) training target observed so far;
/// rules that do not need one ignore it.
pub trait Acquisition: Send + Sync {
    /// Scores each candidate from its posterior mean and standard
    /// deviation. `mean` and `std` are index-aligned.
    fn score(&self, mean: &[f64], std: &[f64], incumbent: f64) -> Vec<f64>;
}

/// Upper-Confidence-Bound rule: `score = mean + κ·std`.
///
/// The default acquisition. κ = 0 is pure exploitation; larger values
/// weight posterior uncertainty more heavily.
#[derive(Clone, Copy, Debug)]
pub struct UpperConfidenceBound {
    kappa: f64,
}

impl UpperConfidenceBound {
    /// Creates a UCB rule with exploration coefficient `kappa`.
    #[must_use]
    pub fn new(kappa: f64) -> Self {
        Self { kappa }
    }

    /// The exploration coefficient.
    #[must_use]
    pub fn kappa(&self) -> f64 {
        self.kappa
    }
}

impl Acquisition for UpperConfidenceBound {
    fn score(&self, mean: &[f64], std: &[f64], _incumbent: f64) -> Vec<f64> {
        mean.iter()
            .zip(std)
            .map(|(&m, &s)| m + self.kappa * s)
            .collect()
    }
}

/// Expected Improvement over the incumbent.
///
/// `EI(x) = (mean - incumbent) Φ(z) + std φ(z)` with
/// `z = (mean - incumbent) / std`, clamped at 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpectedImprovement;

impl Acquisition for ExpectedImprovement {
    fn score(&self, mean: &[f64], std: &[f64], incumbent: f64) -> Vec<f64> {
        mean.iter()
            .zip(std)
            .map(|(&m, &s)| {
                let improvement = m - incumbent;
                if s < 1e-12 {
                    return improvement.max(0.0);
                }
                let z = improvement / s;
                (improvement * norm_cdf(z) + s * norm_pdf(z)).max(0.0)
            })
            .collect()
    }
}

/// Index of the highest score, first occurrence winning ties.
///
/// # Errors
///
/// Returns [`Error::EmptyScores`] for an empty slice and
/// [`Error::NonFiniteScore`] if any score is NaN.
pub fn select_best(scores: &[f64]) -> Result<usize> {
    if scores.is_empty() {
        return Err(Error::EmptyScores);
    }
    let mut best_index = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            return Err(Error::NonFiniteScore { index });
        }
        // Strict comparison keeps the first occurrence on ties.
        if score > best_score {
            best_score = score;
            best_index = index;
        }
    }
    Ok(best_index)
}

/// Standard normal PDF.
fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF (Hart rational approximation).
fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }

    let abs_x = x.abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * abs_x);
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;
    let t5 = t4 * t;

    let poly = 0.319_381_530 * t - 0.356_563_782 * t2 + 1.781_477_937 * t3 - 1.821_255_978 * t4
        + 1.330_274_429 * t5;
    let cdf = 1.0 - norm_pdf(abs_x) * poly;

    if x >= 0.0 { cdf } else { 1.0 - cdf }
}
