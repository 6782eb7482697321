#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]

//! Bayesian-optimization calibration of expensive simulation models
//! against target time-series data, built around a Gaussian-process
//! surrogate with a Matérn 5/2 kernel.
//!
//! The crate fits the surrogate to historical (parameter set → error)
//! observations, sweeps an acquisition function over a Latin Hypercube
//! candidate pool, dispatches the winning candidate to an external
//! solver, and folds the observed error back into the surrogate —
//! iterating until the budget or a stagnation window ends the run.
//!
//! # Core Concepts
//!
//! | Type | Role |
//! |------|------|
//! | [`Calibration`](calibration::Calibration) | Drive the loop: seed, sample, score, dispatch, update, stop. |
//! | [`RunConfig`](config::RunConfig) | Every knob of a run in one explicit value — no ambient state. |
//! | [`GaussianProcess`](surrogate::GaussianProcess) | The surrogate: marginal-likelihood fit, posterior mean/std prediction. |
//! | [`Acquisition`](acquisition::Acquisition) | Pluggable exploration/exploitation rule (UCB by default). |
//! | [`LatinHypercube`](sampling::LatinHypercube) | Stratified, reproducible candidate pools. |
//! | [`Simulator`](simulator::Simulator) | Injected external-solver capability; test doubles plug in here. |
//! | [`TargetSource`](target::TargetSource) | File-based or synthetic calibration target. |
//!
//! # Feature Flags
//!
//! | Flag | What it enables | Default |
//! |------|----------------|---------|
//! | `serde` | `Serialize`/`Deserialize` on reports, records, and series | off |
//! | `tracing` | Structured log events via [`tracing`](https://docs.rs/tracing) at key loop points | off |

/// Emit a `tracing::info!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_info {
    ($($arg:tt)*) => {};
}

/// Emit a `tracing::debug!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod error;
pub mod metrics;
pub mod preprocess;
pub mod sampling;
pub mod simulator;
pub mod surrogate;
pub mod target;

pub use calibration::{Calibration, CalibrationReport, IterationRecord};
pub use config::RunConfig;
pub use error::{Error, Result, SimulationFailure};

/// Convenient wildcard import for the most common types.
///
/// ```
/// use calibrator::prelude::*;
/// ```
pub mod prelude {
    pub use crate::acquisition::{Acquisition, ExpectedImprovement, UpperConfidenceBound};
    pub use crate::calibration::{
        Calibration, CalibrationBuilder, CalibrationReport, IterationOutcome, IterationRecord,
        Phase, StopReason,
    };
    pub use crate::config::{RunConfig, RunConfigBuilder};
    pub use crate::error::{Error, Result, SimulationFailure};
    pub use crate::metrics::{rmse, rmse_aligned};
    pub use crate::preprocess::Standardizer;
    pub use crate::sampling::LatinHypercube;
    pub use crate::simulator::{
        CommandSimulator, FeatureExtractor, SeriesArtifactExtractor, Simulator,
    };
    pub use crate::surrogate::{GaussianProcess, GpOptimizer};
    pub use crate::target::{TargetSource, TimeSeries};
}
