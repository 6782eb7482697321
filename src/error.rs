use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by data preparation, surrogate fitting, candidate
/// sampling, and the calibration loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the log transform encounters a non-positive value.
    #[error("cannot log-transform non-positive value {value} at row {row}, column {col}")]
    NonPositiveParameter {
        /// Row of the offending entry in the raw parameter matrix.
        row: usize,
        /// Column of the offending entry.
        col: usize,
        /// The non-positive value.
        value: f64,
    },

    /// Returned when a parameter index is outside the raw parameter matrix.
    #[error("parameter index {index} out of range for a matrix with {width} columns")]
    IndexOutOfRange {
        /// The requested column index.
        index: usize,
        /// The number of columns actually available.
        width: usize,
    },

    /// Returned when a run configuration fails validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Returned when the surrogate is fitted with too few distinct points.
    #[error("surrogate fit requires at least 2 distinct training points, got {distinct}")]
    InsufficientTrainingPoints {
        /// The number of distinct training inputs supplied.
        distinct: usize,
    },

    /// Returned when training inputs and targets have different lengths.
    #[error("training data length mismatch: {x_rows} inputs vs {y_rows} targets")]
    TrainingLengthMismatch {
        /// The number of input rows.
        x_rows: usize,
        /// The number of target values.
        y_rows: usize,
    },

    /// Returned when rows of a matrix disagree on dimension.
    #[error("dimension mismatch: expected {expected} columns but row {row} has {got}")]
    DimensionMismatch {
        /// The expected number of columns.
        expected: usize,
        /// The actual number of columns in the offending row.
        got: usize,
        /// The index of the offending row.
        row: usize,
    },

    /// Returned when the kernel matrix stays non-positive-definite even
    /// after diagonal jitter escalation.
    #[error("kernel matrix is singular (jitter escalated to {jitter:.3e})")]
    SingularKernel {
        /// The largest diagonal jitter attempted before giving up.
        jitter: f64,
    },

    /// Returned when a sampler is asked for fewer than one point.
    #[error("invalid sample count: {0} (must be at least 1)")]
    InvalidSampleCount(usize),

    /// Returned when every sampling dimension has min == max, leaving no
    /// room for exploration.
    #[error("degenerate sampling bounds: every dimension has min == max")]
    DegenerateBounds,

    /// Returned when a sampling bound has its minimum above its maximum.
    #[error("inverted bounds in dimension {dim}: [{low}, {high}]")]
    InvertedBounds {
        /// The offending dimension index.
        dim: usize,
        /// The lower bound supplied.
        low: f64,
        /// The upper bound supplied.
        high: f64,
    },

    /// Returned when an error metric is requested over too little data.
    #[error("insufficient data for error metric: {reason}")]
    InsufficientData {
        /// Which series was unusable and why.
        reason: &'static str,
    },

    /// Returned when aligned series have different lengths.
    #[error("time series length mismatch: {target} target values vs {simulated} simulated")]
    SeriesLengthMismatch {
        /// Length of the target series.
        target: usize,
        /// Length of the simulated series.
        simulated: usize,
    },

    /// Returned when a time series has unequal time and value lengths.
    #[error("time series has {times} timestamps but {values} values")]
    TimeValueMismatch {
        /// The number of timestamps.
        times: usize,
        /// The number of values.
        values: usize,
    },

    /// Returned when the external simulator fails for one iteration.
    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationFailure),

    /// Returned when simulation failures exceed the configured budget.
    #[error("simulation retry budget of {budget} exhausted after {failures} failures")]
    RetryBudgetExhausted {
        /// The configured retry budget.
        budget: usize,
        /// The number of failures observed.
        failures: usize,
    },

    /// Returned when candidate selection is attempted on an empty pool.
    #[error("no candidate scores to select from")]
    EmptyScores,

    /// Returned when an acquisition score is NaN.
    #[error("non-finite acquisition score at candidate {index}")]
    NonFiniteScore {
        /// The index of the candidate with the unusable score.
        index: usize,
    },

    /// Returned when a data file contains a token that is not a number.
    #[error("malformed numeric data at {path}:{line}: {token:?}")]
    MalformedData {
        /// The file being parsed.
        path: String,
        /// The 1-based line number.
        line: usize,
        /// The token that failed to parse.
        token: String,
    },

    /// Returned when reading a data file fails.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Ways the external simulator collaborator can fail.
///
/// A single failed invocation is recoverable: the calibration loop records
/// the failed iteration and keeps going until the retry budget runs out.
#[derive(Debug, thiserror::Error)]
pub enum SimulationFailure {
    /// The simulator process could not be launched.
    #[error("failed to launch simulator `{program}`: {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The simulator exited with a non-zero status.
    #[error("simulator exited with status {status}")]
    NonZeroExit {
        /// The exit code, or -1 if terminated by a signal.
        status: i32,
    },

    /// The simulator exited successfully but left no output artifact.
    #[error("simulator produced no output artifact at {path}")]
    MissingArtifact {
        /// Where the artifact was expected.
        path: PathBuf,
    },

    /// The simulator exceeded its wall-clock budget and was killed.
    #[error("simulator timed out after {timeout:?}")]
    Timeout {
        /// The enforced timeout.
        timeout: Duration,
    },

    /// The output artifact existed but could not be used.
    #[error("simulator output could not be parsed: {reason}")]
    MalformedOutput {
        /// Why the artifact was rejected.
        reason: String,
    },
}
