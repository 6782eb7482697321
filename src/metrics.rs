//! Error metrics between simulated and target series.
//!
//! The calibration error is the RMSE between the two series after the
//! simulated one has been resampled onto the target's time grid by
//! linear interpolation. Outside the simulated support the nearest
//! endpoint value is held, so a shorter simulation still yields a
//! finite, comparable error.

use crate::error::{Error, Result};
use crate::target::TimeSeries;

/// RMSE between `target` and `simulated` on the target's time grid.
///
/// When the two grids are already identical the series are differenced
/// directly; otherwise every target timestamp is evaluated against the
/// linearly interpolated simulated series.
///
/// # Errors
///
/// Returns [`Error::InsufficientData`] if either series is empty —
/// never a silent 0 or NaN.
pub fn rmse(target: &TimeSeries, simulated: &TimeSeries) -> Result<f64> {
    if target.is_empty() {
        return Err(Error::InsufficientData {
            reason: "empty target series",
        });
    }
    if simulated.is_empty() {
        return Err(Error::InsufficientData {
            reason: "empty simulated series",
        });
    }

    if same_grid(&target.time, &simulated.time) {
        return rmse_aligned(&target.values, &simulated.values);
    }

    #[allow(clippy::cast_precision_loss)]
    let mean_sq = target
        .time
        .iter()
        .zip(&target.values)
        .map(|(&t, &value)| {
            let interpolated = interpolate(simulated, t);
            (value - interpolated).powi(2)
        })
        .sum::<f64>()
        / target.len() as f64;

    Ok(mean_sq.sqrt())
}

/// RMSE between two already-aligned value arrays.
///
/// # Errors
///
/// Returns [`Error::InsufficientData`] for empty input and
/// [`Error::SeriesLengthMismatch`] when the lengths differ.
pub fn rmse_aligned(target: &[f64], simulated: &[f64]) -> Result<f64> {
    if target.is_empty() {
        return Err(Error::InsufficientData {
            reason: "empty value arrays",
        });
    }
    if target.len() != simulated.len() {
        return Err(Error::SeriesLengthMismatch {
            target: target.len(),
            simulated: simulated.len(),
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let mean_sq = target
        .iter()
        .zip(simulated)
        .map(|(&a, &b)| (a - b).powi(2))
        .sum::<f64>()
        / target.len() as f64;

    Ok(mean_sq.sqrt())
}

fn same_grid(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| (x - y).abs() < 1e-12)
}

/// Linear interpolation at `t`, holding endpoint values outside the
/// series' time support. Assumes non-decreasing timestamps and at least
/// one sample (checked by the caller).
fn interpolate(series: &TimeSeries, t: f64) -> f64 {
    let time = &series.time;
    let values = &series.values;

    if t <= time[0] {
        return values[0];
    }
    if t >= time[time.len() - 1] {
        return values[values.len() - 1];
    }

    let upper = time.partition_point(|&sample| sample < t);
    let (t0, t1) = (time[upper - 1], time[upper]);
    let (v0, v1) = (values[upper - 1], values[upper]);
    if (t1 - t0).abs() < 1e-15 {
        return v0;
    }
    v0 + (v1 - v0) * (t - t0) / (t1 - t0)
}
