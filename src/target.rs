//! Target time-series loading.
//!
//! The calibration target is a `time value` pair per line, whitespace
//! delimited. [`TargetSource`] abstracts over where the series comes
//! from so the loop never branches on a data-type flag: real recordings
//! live in files, synthetic references are passed in memory.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// A sampled time series: index-aligned timestamps and values.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSeries {
    /// Sample timestamps, expected to be non-decreasing.
    pub time: Vec<f64>,
    /// Sample values, one per timestamp.
    pub values: Vec<f64>,
}

impl TimeSeries {
    /// Creates a series from index-aligned timestamps and values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeValueMismatch`] if the lengths differ.
    pub fn new(time: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if time.len() != values.len() {
            return Err(Error::TimeValueMismatch {
                times: time.len(),
                values: values.len(),
            });
        }
        Ok(Self { time, values })
    }

    /// The number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the series has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Where the calibration target comes from.
///
/// # Examples
///
/// ```
/// use calibrator::target::{TargetSource, TimeSeries};
///
/// let series = TimeSeries::new(vec![0.0, 1.0], vec![1.5, 2.5]).unwrap();
/// let source = TargetSource::Synthetic(series.clone());
/// assert_eq!(source.load().unwrap(), series);
/// ```
#[derive(Clone, Debug)]
pub enum TargetSource {
    /// A whitespace-delimited two-column `time value` text file.
    FileBased(PathBuf),
    /// An in-memory reference series.
    Synthetic(TimeSeries),
}

impl TargetSource {
    /// Loads the target series.
    ///
    /// An empty file is a valid, empty series — downstream error-metric
    /// computation is where emptiness becomes an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::MalformedData`] for lines that are not two numbers.
    pub fn load(&self) -> Result<TimeSeries> {
        match self {
            Self::Synthetic(series) => Ok(series.clone()),
            Self::FileBased(path) => {
                let text = fs::read_to_string(path)?;
                let mut time = Vec::new();
                let mut values = Vec::new();

                for (line_idx, line) in text.lines().enumerate() {
                    let mut tokens = line.split_whitespace();
                    let Some(first) = tokens.next() else {
                        continue;
                    };
                    let second = tokens.next().ok_or_else(|| Error::MalformedData {
                        path: path.display().to_string(),
                        line: line_idx + 1,
                        token: line.trim().to_string(),
                    })?;
                    let parse = |token: &str| -> Result<f64> {
                        token.parse().map_err(|_| Error::MalformedData {
                            path: path.display().to_string(),
                            line: line_idx + 1,
                            token: token.to_string(),
                        })
                    };
                    time.push(parse(first)?);
                    values.push(parse(second)?);
                }

                Ok(TimeSeries { time, values })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn file_based_parses_two_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "  1.0\t2.0  ").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "2.0 1.5 extra-ignored").unwrap();

        let series = TargetSource::FileBased(file.path().to_path_buf())
            .load()
            .unwrap();
        assert_eq!(series.time, vec![0.0, 1.0, 2.0]);
        assert_eq!(series.values, vec![1.0, 2.0, 1.5]);
    }

    #[test]
    fn empty_file_yields_empty_series() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let series = TargetSource::FileBased(file.path().to_path_buf())
            .load()
            .unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn one_column_line_is_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "5.0").unwrap();
        let err = TargetSource::FileBased(file.path().to_path_buf())
            .load()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedData { line: 2, .. }));
    }

    #[test]
    fn non_numeric_token_is_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0 pressure").unwrap();
        let err = TargetSource::FileBased(file.path().to_path_buf())
            .load()
            .unwrap_err();
        match err {
            Error::MalformedData { line, token, .. } => {
                assert_eq!(line, 1);
                assert_eq!(token, "pressure");
            }
            other => panic!("expected MalformedData, got {other:?}"),
        }
    }

    #[test]
    fn series_constructor_rejects_mismatch() {
        assert!(matches!(
            TimeSeries::new(vec![0.0], vec![]),
            Err(Error::TimeValueMismatch { times: 1, values: 0 })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = TargetSource::FileBased(PathBuf::from("/nonexistent/target.txt"))
            .load()
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
