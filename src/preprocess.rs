//! Raw-data preparation for the surrogate: log transform, column
//! selection, standardization, and the numeric matrix file loader.
//!
//! The pipeline mirrors how training data reaches the Gaussian process:
//! raw parameter rows are log-transformed, projected down to the actively
//! calibrated columns, and standardized to zero mean and unit variance.
//! The [`Standardizer`] fitted on the seed set is the normalization state
//! for the whole run — every later candidate must go through the *same*
//! instance, in both directions, or surrogate predictions silently rot.
//!
//! All functions return fresh vectors; inputs are never mutated.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Floor applied to per-column standard deviations so constant columns
/// do not divide by zero.
const MIN_STD: f64 = 1e-12;

/// Applies an elementwise natural-log transform to a raw parameter matrix.
///
/// # Errors
///
/// Returns [`Error::NonPositiveParameter`] identifying the first entry
/// that is zero or negative.
///
/// # Examples
///
/// ```
/// use calibrator::preprocess::log_transform;
///
/// let raw = vec![vec![1.0, core::f64::consts::E]];
/// let transformed = log_transform(&raw).unwrap();
/// assert!((transformed[0][1] - 1.0).abs() < 1e-12);
/// assert!(log_transform(&[vec![0.0]]).is_err());
/// ```
pub fn log_transform(rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let mut out = Vec::with_capacity(rows.len());
    for (row_idx, row) in rows.iter().enumerate() {
        let mut transformed = Vec::with_capacity(row.len());
        for (col_idx, &value) in row.iter().enumerate() {
            if value <= 0.0 {
                return Err(Error::NonPositiveParameter {
                    row: row_idx,
                    col: col_idx,
                    value,
                });
            }
            transformed.push(value.ln());
        }
        out.push(transformed);
    }
    Ok(out)
}

/// Projects a matrix down to the columns at `indices`, in the given order.
///
/// # Errors
///
/// Returns [`Error::IndexOutOfRange`] if any index is not a valid column
/// of the first row. Rows narrower than the first row surface as
/// [`Error::DimensionMismatch`].
pub fn select_columns(rows: &[Vec<f64>], indices: &[usize]) -> Result<Vec<Vec<f64>>> {
    let width = rows.first().map_or(0, Vec::len);
    for &index in indices {
        if index >= width {
            return Err(Error::IndexOutOfRange { index, width });
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(Error::DimensionMismatch {
                expected: width,
                got: row.len(),
                row: row_idx,
            });
        }
        out.push(indices.iter().map(|&i| row[i]).collect());
    }
    Ok(out)
}

/// Per-column normalization state, fitted once on the seed training set.
///
/// Holds the mean and standard deviation of each column and maps rows
/// between raw and standardized space. The instance is immutable after
/// [`fit`](Standardizer::fit); refitting mid-run would mix normalization
/// epochs, so the calibration loop never does.
///
/// # Examples
///
/// ```
/// use calibrator::preprocess::Standardizer;
///
/// let rows = vec![vec![1.0, 10.0], vec![3.0, 30.0], vec![5.0, 50.0]];
/// let scaler = Standardizer::fit(&rows).unwrap();
///
/// let standardized = scaler.transform(&rows).unwrap();
/// let back = scaler.inverse_transform_row(&standardized[0]);
/// assert!((back[0] - 1.0).abs() < 1e-9);
/// assert!((back[1] - 10.0).abs() < 1e-9);
/// ```
#[derive(Clone, Debug)]
pub struct Standardizer {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    /// Computes per-column mean and standard deviation over `rows`.
    ///
    /// Standard deviations are population (1/N) estimates, floored at a
    /// tiny positive value so constant columns stay invertible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientData`] for an empty matrix and
    /// [`Error::DimensionMismatch`] for ragged rows.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Error::InsufficientData {
                reason: "cannot standardize an empty matrix",
            });
        };
        let dim = first.len();
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                    row: row_idx,
                });
            }
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; dim];
        for row in rows {
            for (mean, &value) in means.iter_mut().zip(row) {
                *mean += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        let mut stds = vec![0.0; dim];
        for row in rows {
            for ((std, &mean), &value) in stds.iter_mut().zip(&means).zip(row) {
                *std += (value - mean).powi(2);
            }
        }
        for std in &mut stds {
            *std = (*std / n).sqrt().max(MIN_STD);
        }

        Ok(Self { means, stds })
    }

    /// Returns the number of columns this standardizer was fitted on.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.means.len()
    }

    /// Standardizes every row of `rows`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if a row's width differs from
    /// the fitted dimension.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter()
            .enumerate()
            .map(|(row_idx, row)| {
                if row.len() == self.dim() {
                    Ok(self.transform_row(row))
                } else {
                    Err(Error::DimensionMismatch {
                        expected: self.dim(),
                        got: row.len(),
                        row: row_idx,
                    })
                }
            })
            .collect()
    }

    /// Standardizes a single row.
    ///
    /// The row must have the fitted dimension; this is enforced by the
    /// callers that accept external data.
    #[must_use]
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((&value, &mean), &std)| (value - mean) / std)
            .collect()
    }

    /// Maps a standardized row back to raw space.
    #[must_use]
    pub fn inverse_transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((&value, &mean), &std)| value * std + mean)
            .collect()
    }
}

/// Computes per-column `(min, max)` over a matrix.
///
/// Used to bound candidate sampling to the observed range of the
/// standardized training inputs.
#[must_use]
pub fn column_bounds(rows: &[Vec<f64>]) -> Vec<(f64, f64)> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let mut bounds: Vec<(f64, f64)> = first.iter().map(|&v| (v, v)).collect();
    for row in &rows[1..] {
        for (bound, &value) in bounds.iter_mut().zip(row) {
            bound.0 = bound.0.min(value);
            bound.1 = bound.1.max(value);
        }
    }
    bounds
}

/// Loads a whitespace-delimited numeric matrix from a text file.
///
/// One row per non-empty line. An empty file yields an empty matrix;
/// ragged rows and non-numeric tokens are errors.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read,
/// [`Error::MalformedData`] for unparseable tokens, and
/// [`Error::DimensionMismatch`] for ragged rows.
pub fn load_matrix(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path)?;
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (line_idx, line) in text.lines().enumerate() {
        if line.split_whitespace().next().is_none() {
            continue;
        }
        let mut row = Vec::new();
        for token in line.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| Error::MalformedData {
                path: path.display().to_string(),
                line: line_idx + 1,
                token: token.to_string(),
            })?;
            row.push(value);
        }
        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                return Err(Error::DimensionMismatch {
                    expected: first.len(),
                    got: row.len(),
                    row: rows.len(),
                });
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn log_transform_rejects_non_positive() {
        let err = log_transform(&[vec![2.0, -1.0]]).unwrap_err();
        match err {
            Error::NonPositiveParameter { row, col, value } => {
                assert_eq!(row, 0);
                assert_eq!(col, 1);
                assert!((value + 1.0).abs() < 1e-12);
            }
            other => panic!("expected NonPositiveParameter, got {other:?}"),
        }
    }

    #[test]
    fn log_transform_leaves_input_untouched() {
        let raw = vec![vec![1.0, 2.0]];
        let out = log_transform(&raw).unwrap();
        assert!((raw[0][0] - 1.0).abs() < 1e-15);
        assert!((out[0][0]).abs() < 1e-15);
        assert!((out[0][1] - core::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn select_columns_projects_in_order() {
        let rows = vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]];
        let selected = select_columns(&rows, &[2, 0]).unwrap();
        assert_eq!(selected, vec![vec![2.0, 0.0], vec![5.0, 3.0]]);
    }

    #[test]
    fn select_columns_rejects_bad_index() {
        let rows = vec![vec![0.0, 1.0]];
        let err = select_columns(&rows, &[0, 2]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 2, width: 2 }));
    }

    #[test]
    fn standardizer_round_trip_within_tolerance() {
        let rows = vec![
            vec![1.0, 200.0, -4.0],
            vec![2.5, 180.0, -3.0],
            vec![4.0, 260.0, -5.5],
        ];
        let scaler = Standardizer::fit(&rows).unwrap();
        for row in &rows {
            let back = scaler.inverse_transform_row(&scaler.transform_row(row));
            for (&orig, &recovered) in row.iter().zip(&back) {
                assert!(
                    (orig - recovered).abs() < 1e-9,
                    "round trip drifted: {orig} -> {recovered}"
                );
            }
        }
    }

    #[test]
    fn standardizer_produces_zero_mean_unit_variance() {
        let rows = vec![vec![2.0], vec![4.0], vec![6.0]];
        let scaler = Standardizer::fit(&rows).unwrap();
        let standardized = scaler.transform(&rows).unwrap();
        let mean: f64 = standardized.iter().map(|r| r[0]).sum::<f64>() / 3.0;
        let var: f64 = standardized.iter().map(|r| (r[0] - mean).powi(2)).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn standardizer_handles_constant_column() {
        let rows = vec![vec![5.0], vec![5.0]];
        let scaler = Standardizer::fit(&rows).unwrap();
        let standardized = scaler.transform_row(&[5.0]);
        assert!(standardized[0].abs() < 1e-9);
        let back = scaler.inverse_transform_row(&standardized);
        assert!((back[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn standardizer_rejects_empty_matrix() {
        assert!(matches!(
            Standardizer::fit(&[]),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn column_bounds_cover_observations() {
        let rows = vec![vec![1.0, -2.0], vec![3.0, -5.0], vec![2.0, 0.5]];
        let bounds = column_bounds(&rows);
        assert_eq!(bounds.len(), 2);
        assert!((bounds[0].0 - 1.0).abs() < 1e-15);
        assert!((bounds[0].1 - 3.0).abs() < 1e-15);
        assert!((bounds[1].0 + 5.0).abs() < 1e-15);
        assert!((bounds[1].1 - 0.5).abs() < 1e-15);
    }

    #[test]
    fn load_matrix_parses_and_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.0 2.0").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "3.0 4.5").unwrap();
        let rows = load_matrix(file.path()).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0, 4.5]]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "1.0 abc").unwrap();
        assert!(matches!(
            load_matrix(bad.path()),
            Err(Error::MalformedData { line: 1, .. })
        ));
    }

    #[test]
    fn load_matrix_empty_file_is_empty_matrix() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(load_matrix(file.path()).unwrap().is_empty());
    }
}
