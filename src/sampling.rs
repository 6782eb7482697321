//! Space-filling candidate generation via Latin Hypercube sampling.
//!
//! [`LatinHypercube`] stratifies each dimension of the requested bounds
//! into `n` equal-probability bins, places exactly one sample in every
//! bin, and shuffles bin order independently per dimension. Compared to
//! pure random pools this keeps the acquisition sweep from clustering
//! candidates in some corners of the space by chance.
//!
//! Sampling is reproducible: the same seed and arguments produce the
//! same design.
//!
//! # Examples
//!
//! ```
//! use calibrator::sampling::LatinHypercube;
//!
//! let sampler = LatinHypercube::with_seed(42);
//! let design = sampler.generate(100, &[(-1.0, 1.0), (0.0, 10.0)]).unwrap();
//! assert_eq!(design.len(), 100);
//! assert!(design.iter().all(|p| (-1.0..=1.0).contains(&p[0])));
//! ```

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Latin Hypercube candidate sampler.
///
/// Keeps its RNG behind a mutex so a shared reference can generate
/// designs, matching how the calibration loop holds it.
pub struct LatinHypercube {
    rng: Mutex<fastrand::Rng>,
}

impl LatinHypercube {
    /// Creates a sampler with a random seed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Creates a sampler with a fixed seed for reproducibility.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }

    /// Generates `n` points inside `bounds`, one per stratum in every
    /// dimension.
    ///
    /// A dimension whose bounds collapse to a single value is pinned to
    /// that value; only when *every* dimension is degenerate is the
    /// request rejected, since no exploration is possible at all.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSampleCount`] if `n < 1`.
    /// - [`Error::DegenerateBounds`] if bounds are empty or min == max in
    ///   every dimension.
    /// - [`Error::InvertedBounds`] if any minimum exceeds its maximum.
    #[allow(clippy::cast_precision_loss)]
    pub fn generate(&self, n: usize, bounds: &[(f64, f64)]) -> Result<Vec<Vec<f64>>> {
        if n < 1 {
            return Err(Error::InvalidSampleCount(n));
        }
        for (dim, &(low, high)) in bounds.iter().enumerate() {
            if low > high {
                return Err(Error::InvertedBounds { dim, low, high });
            }
        }
        if bounds.iter().all(|&(low, high)| low == high) {
            return Err(Error::DegenerateBounds);
        }

        let mut rng = self.rng.lock();
        let mut design = vec![Vec::with_capacity(bounds.len()); n];
        let mut strata: Vec<usize> = (0..n).collect();

        for &(low, high) in bounds {
            let span = high - low;
            rng.shuffle(&mut strata);
            for (point, &stratum) in design.iter_mut().zip(&strata) {
                let within = (stratum as f64 + rng.f64()) / n as f64;
                point.push(low + within * span);
            }
        }

        Ok(design)
    }
}

impl Default for LatinHypercube {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: [(f64, f64); 3] = [(-2.0, 2.0), (0.0, 1.0), (10.0, 30.0)];

    #[test]
    fn rejects_zero_samples() {
        let sampler = LatinHypercube::with_seed(0);
        assert!(matches!(
            sampler.generate(0, &BOUNDS),
            Err(Error::InvalidSampleCount(0))
        ));
    }

    #[test]
    fn rejects_fully_degenerate_bounds() {
        let sampler = LatinHypercube::with_seed(0);
        assert!(matches!(
            sampler.generate(5, &[(1.0, 1.0), (2.0, 2.0)]),
            Err(Error::DegenerateBounds)
        ));
        assert!(matches!(
            sampler.generate(5, &[]),
            Err(Error::DegenerateBounds)
        ));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let sampler = LatinHypercube::with_seed(0);
        let err = sampler.generate(5, &[(0.0, 1.0), (3.0, 2.0)]).unwrap_err();
        assert!(matches!(err, Error::InvertedBounds { dim: 1, .. }));
    }

    #[test]
    fn single_degenerate_dimension_is_pinned() {
        let sampler = LatinHypercube::with_seed(7);
        let design = sampler.generate(20, &[(0.0, 1.0), (5.0, 5.0)]).unwrap();
        assert!(design.iter().all(|p| (p[1] - 5.0).abs() < 1e-15));
    }

    #[test]
    fn each_dimension_is_stratified() {
        let sampler = LatinHypercube::with_seed(123);
        let n = 50;
        let design = sampler.generate(n, &BOUNDS).unwrap();

        for (dim, &(low, high)) in BOUNDS.iter().enumerate() {
            let mut occupancy = vec![0_usize; n];
            for point in &design {
                let within = (point[dim] - low) / (high - low);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let bin = ((within * n as f64).floor() as usize).min(n - 1);
                occupancy[bin] += 1;
            }
            assert!(
                occupancy.iter().all(|&count| count == 1),
                "dimension {dim} not stratified: {occupancy:?}"
            );
        }
    }

    #[test]
    fn covers_at_least_ninety_percent_of_span() {
        // With 50 strata the extreme bins pin the empirical range above
        // 96% of the span, seed-independent.
        let sampler = LatinHypercube::with_seed(99);
        let design = sampler.generate(50, &BOUNDS).unwrap();

        for (dim, &(low, high)) in BOUNDS.iter().enumerate() {
            let observed_min = design.iter().map(|p| p[dim]).fold(f64::INFINITY, f64::min);
            let observed_max = design
                .iter()
                .map(|p| p[dim])
                .fold(f64::NEG_INFINITY, f64::max);
            let coverage = (observed_max - observed_min) / (high - low);
            assert!(
                coverage >= 0.9,
                "dimension {dim} covers only {coverage:.2} of the span"
            );
        }
    }

    #[test]
    fn reproducible_with_same_seed() {
        let a = LatinHypercube::with_seed(42).generate(25, &BOUNDS).unwrap();
        let b = LatinHypercube::with_seed(42).generate(25, &BOUNDS).unwrap();
        assert_eq!(a, b);

        let c = LatinHypercube::with_seed(43).generate(25, &BOUNDS).unwrap();
        assert_ne!(a, c);
    }
}
