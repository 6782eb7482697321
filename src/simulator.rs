//! External simulator and feature-extractor collaborators.
//!
//! The calibration loop never talks to a concrete solver: it holds a
//! [`Simulator`] that turns a raw parameter set into an output artifact,
//! and a [`FeatureExtractor`] that turns the artifact into the simulated
//! time series. Production runs use [`CommandSimulator`] to drive the
//! solver as a subprocess; tests inject in-process doubles.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::error::SimulationFailure;
use crate::target::{TargetSource, TimeSeries};

/// Runs one simulation for a raw (denormalized, full-dimension)
/// parameter set and yields the path of the produced artifact.
///
/// Implementations must be `Send + Sync`; the loop holds them behind a
/// trait object.
pub trait Simulator: Send + Sync {
    /// Invokes the simulator. Exit contract: `Ok` means the artifact
    /// exists at the returned path and is ready for feature extraction.
    fn run(&self, params: &[f64]) -> core::result::Result<PathBuf, SimulationFailure>;
}

/// Turns a simulator output artifact into the simulated time series.
pub trait FeatureExtractor: Send + Sync {
    /// Reads and reduces the artifact.
    fn extract(&self, artifact: &Path) -> core::result::Result<TimeSeries, SimulationFailure>;
}

/// Default wall-clock budget for one solver invocation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// How often the child process is polled while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Subprocess-backed [`Simulator`].
///
/// Appends each parameter as a formatted trailing argument, enforces a
/// wall-clock timeout by polling the child, and maps every failure mode
/// (spawn error, non-zero exit, timeout, missing artifact) to a
/// [`SimulationFailure`] variant.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// use calibrator::simulator::{CommandSimulator, Simulator};
///
/// let sim = CommandSimulator::new("/opt/solver/onedsolver", "results/output.txt")
///     .arg("--model")
///     .arg("cross-section.in")
///     .timeout(Duration::from_secs(600));
///
/// let artifact = sim.run(&[0.5, 0.01, 0.01, 0.01, 0.01]).unwrap();
/// assert_eq!(artifact, PathBuf::from("results/output.txt"));
/// ```
pub struct CommandSimulator {
    program: PathBuf,
    args: Vec<String>,
    artifact: PathBuf,
    timeout: Duration,
}

impl CommandSimulator {
    /// Creates a simulator invoking `program`, expecting it to write
    /// its output to `artifact`.
    pub fn new(program: impl Into<PathBuf>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            artifact: artifact.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Appends a fixed argument placed before the parameter values.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the wall-clock budget for one invocation.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Simulator for CommandSimulator {
    fn run(&self, params: &[f64]) -> core::result::Result<PathBuf, SimulationFailure> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(params.iter().map(|p| format!("{p:.17e}")))
            .spawn()
            .map_err(|source| SimulationFailure::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(SimulationFailure::Timeout {
                            timeout: self.timeout,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    return Err(SimulationFailure::Spawn {
                        program: self.program.display().to_string(),
                        source,
                    });
                }
            }
        };

        if !status.success() {
            return Err(SimulationFailure::NonZeroExit {
                status: status.code().unwrap_or(-1),
            });
        }
        if !self.artifact.exists() {
            return Err(SimulationFailure::MissingArtifact {
                path: self.artifact.clone(),
            });
        }
        Ok(self.artifact.clone())
    }
}

/// [`FeatureExtractor`] for artifacts that already are two-column
/// `time value` text, the format the one-dimensional solver emits.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeriesArtifactExtractor;

impl FeatureExtractor for SeriesArtifactExtractor {
    fn extract(&self, artifact: &Path) -> core::result::Result<TimeSeries, SimulationFailure> {
        TargetSource::FileBased(artifact.to_path_buf())
            .load()
            .map_err(|e| SimulationFailure::MalformedOutput {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn spawn_failure_is_reported() {
        let sim = CommandSimulator::new("/nonexistent/solver-binary", "/tmp/na.txt");
        let err = sim.run(&[1.0]).unwrap_err();
        assert!(matches!(err, SimulationFailure::Spawn { .. }));
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let sim = CommandSimulator::new("false", "/tmp/na.txt");
        let err = sim.run(&[]).unwrap_err();
        assert!(matches!(err, SimulationFailure::NonZeroExit { .. }));
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("never-written.txt");
        let sim = CommandSimulator::new("true", &artifact);
        let err = sim.run(&[0.5]).unwrap_err();
        assert!(matches!(err, SimulationFailure::MissingArtifact { .. }));
    }

    #[test]
    fn successful_run_returns_artifact_path() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("output.txt");
        std::fs::write(&artifact, "0.0 1.0\n").unwrap();
        let sim = CommandSimulator::new("true", &artifact);
        assert_eq!(sim.run(&[0.5]).unwrap(), artifact);
    }

    #[test]
    fn timeout_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("na.txt");
        let sim = CommandSimulator::new("sleep", &artifact)
            .arg("30")
            .timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = sim.run(&[]).unwrap_err();
        assert!(matches!(err, SimulationFailure::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn series_extractor_parses_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "1.0 2.0").unwrap();
        let series = SeriesArtifactExtractor.extract(file.path()).unwrap();
        assert_eq!(series.values, vec![1.0, 2.0]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "not numbers").unwrap();
        let err = SeriesArtifactExtractor.extract(bad.path()).unwrap_err();
        assert!(matches!(err, SimulationFailure::MalformedOutput { .. }));
    }
}
