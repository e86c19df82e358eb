//! Sweep configuration using Figment
//!
//! Settings are assembled from, in increasing order of precedence:
//! 1. Built-in defaults (the bench setup the tool was written for)
//! 2. A TOML file (`config/default.toml` unless another path is given)
//! 3. Environment variables prefixed with `BIAS_SWEEP_`, using `__` between levels
//!
//! ```text
//! BIAS_SWEEP_SWEEP__AVERAGING=64
//! BIAS_SWEEP_TIMING__SETTLE=2s
//! BIAS_SWEEP_STORAGE__OUTPUT_DIR=/data/run42
//! ```
//!
//! Everything here is fixed for the lifetime of a run; nothing is reconfigurable
//! once the sweep has started.
//!
//! # Example
//!
//! ```toml
//! [instruments]
//! vna = "GPIB0::16::INSTR"
//! supply1 = "GPIB0::5::INSTR"
//! supply2 = "GPIB0::6::INSTR"
//! timeout = "5s"
//!
//! [sweep]
//! start_ghz = 1.0
//! stop_ghz = 50.0
//! points = 401
//! averaging = 512
//! calibration = true
//! calibration_set = 1
//! bias1 = { start = 0.0, stop = 1.8, step = 0.2 }
//! bias2 = [0.0, 0.9, 1.8]
//!
//! [timing]
//! settle = "5s"
//! acquisition = "10s"
//!
//! [storage]
//! output_dir = "results"
//! ```

use crate::error::{AppResult, SweepError};
use crate::measurement::BiasGrid;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Point counts the network analyzer accepts.
pub const VALID_POINT_COUNTS: [u32; 4] = [51, 101, 201, 401];

/// Number of stored calibration sets selectable with `CALS<k>`.
pub const MAX_CALIBRATION_SET: u8 = 8;

/// Upper bound on the number of voltages a range may expand to.
pub const MAX_SEQUENCE_LENGTH: usize = 10_000;

/// Voltages are snapped to this resolution when expanded from a range.
const VOLTAGE_RESOLUTION: f64 = 1e-9;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// VISA resources of the three instruments
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    /// Frequency sweep and bias grid
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Fixed waits standing in for completion signals
    #[serde(default)]
    pub timing: TimingConfig,
    /// Where results are written
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Instrument resource strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    /// VISA resource of the network analyzer
    pub vna: String,
    /// VISA resource of power supply 1
    pub supply1: String,
    /// VISA resource of power supply 2
    pub supply2: String,
    /// I/O timeout applied to every VISA write and read
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Sweep parameters: the VNA frequency sweep plus the two bias sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Start frequency in GHz
    pub start_ghz: f64,
    /// Stop frequency in GHz
    pub stop_ghz: f64,
    /// Number of frequency points, one of [`VALID_POINT_COUNTS`]
    pub points: u32,
    /// Averaging factor
    pub averaging: u32,
    /// Whether error correction is switched on
    pub calibration: bool,
    /// Calibration set recalled when `calibration` is on
    #[serde(default = "default_calibration_set")]
    pub calibration_set: u8,
    /// Voltages commanded on supply 1 (outer loop)
    pub bias1: VoltageSequence,
    /// Voltages commanded on supply 2 (inner loop)
    pub bias2: VoltageSequence,
}

/// Fixed-duration waits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait after applying a bias point before any reading is trusted
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
    /// Wait between triggering a capture and reading the data block; must cover
    /// the averaging time of the configured sweep
    #[serde(default = "default_acquisition", with = "humantime_serde")]
    pub acquisition: Duration,
}

/// Output location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all result files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// An ordered sequence of bias voltages.
///
/// Either an explicit list or an inclusive range:
///
/// ```toml
/// bias1 = [0.0, 0.5, 1.0]
/// bias2 = { start = 0.0, stop = 1.8, step = 0.2 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoltageSequence {
    /// Voltages in the given order
    List(Vec<f64>),
    /// `start, start + step, ...` up to and including `stop`
    Range {
        /// First voltage
        start: f64,
        /// Last voltage (inclusive)
        stop: f64,
        /// Increment, negative for descending sweeps
        step: f64,
    },
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_io_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_calibration_set() -> u8 {
    1
}

fn default_settle() -> Duration {
    Duration::from_secs(5)
}

fn default_acquisition() -> Duration {
    Duration::from_secs(10)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_bias() -> VoltageSequence {
    VoltageSequence::Range {
        start: 0.0,
        stop: 1.8,
        step: 0.2,
    }
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            vna: "GPIB0::16::INSTR".to_string(),
            supply1: "GPIB0::5::INSTR".to_string(),
            supply2: "GPIB0::6::INSTR".to_string(),
            timeout: default_io_timeout(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_ghz: 1.0,
            stop_ghz: 50.0,
            points: 401,
            averaging: 512,
            calibration: true,
            calibration_set: default_calibration_set(),
            bias1: default_bias(),
            bias2: default_bias(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle: default_settle(),
            acquisition: default_acquisition(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// ============================================================================
// Voltage sequences
// ============================================================================

impl VoltageSequence {
    /// Expand into the concrete, ordered voltages.
    ///
    /// Range members are computed as `start + i * step` rather than by repeated
    /// addition, then snapped to nano-volt resolution, so `0.0..=1.8 step 0.2`
    /// yields exactly `0.6` and never `0.6000000000000001`.
    pub fn values(&self) -> AppResult<Vec<f64>> {
        match self {
            VoltageSequence::List(values) => {
                if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                    return Err(SweepError::Configuration(format!(
                        "bias voltage {} is not a finite number",
                        bad
                    )));
                }
                Ok(values.clone())
            }
            VoltageSequence::Range { start, stop, step } => {
                let (start, stop, step) = (*start, *stop, *step);
                if !start.is_finite() || !stop.is_finite() || !step.is_finite() {
                    return Err(SweepError::Configuration(format!(
                        "bias range {}..={} step {} must be finite",
                        start, stop, step
                    )));
                }
                if step == 0.0 {
                    return Err(SweepError::Configuration(
                        "bias range step must not be zero".to_string(),
                    ));
                }
                let span = stop - start;
                if span != 0.0 && span.signum() != step.signum() {
                    return Err(SweepError::Configuration(format!(
                        "bias range step {} never reaches {} from {}",
                        step, stop, start
                    )));
                }
                let steps = (span / step + 1e-9).floor();
                let count = (steps as usize)
                    .checked_add(1)
                    .filter(|&n| steps.is_finite() && n <= MAX_SEQUENCE_LENGTH)
                    .ok_or_else(|| {
                        SweepError::Configuration(format!(
                            "bias range {}..={} step {} has more than {} voltages",
                            start, stop, step, MAX_SEQUENCE_LENGTH
                        ))
                    })?;
                Ok((0..count)
                    .map(|i| snap_voltage(start + i as f64 * step))
                    .collect())
            }
        }
    }
}

fn snap_voltage(v: f64) -> f64 {
    let snapped = (v / VOLTAGE_RESOLUTION).round() * VOLTAGE_RESOLUTION;
    // keep "-0.0" out of filenames
    if snapped == 0.0 {
        0.0
    } else {
        snapped
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load settings from `config/default.toml` (if present) and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/default.toml")
    }

    /// Load settings from a specific file path layered over the built-in defaults.
    ///
    /// A missing file is not an error; the defaults and environment still apply.
    /// The loaded settings are validated before being returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BIAS_SWEEP_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check every constraint that must hold before touching an instrument.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Configuration`] describing the first violation.
    pub fn validate(&self) -> AppResult<()> {
        self.sweep.validate()?;

        if self.timing.acquisition.is_zero() {
            return Err(SweepError::Configuration(
                "acquisition interval must be greater than zero".to_string(),
            ));
        }

        for (name, resource) in [
            ("vna", &self.instruments.vna),
            ("supply1", &self.instruments.supply1),
            ("supply2", &self.instruments.supply2),
        ] {
            if resource.trim().is_empty() {
                return Err(SweepError::Configuration(format!(
                    "instrument resource '{}' cannot be empty",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Write the resolved settings next to the results.
    pub fn snapshot_to(&self, path: &Path) -> AppResult<()> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl SweepConfig {
    /// Validate the frequency sweep and both bias sequences.
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_POINT_COUNTS.contains(&self.points) {
            return Err(SweepError::Configuration(format!(
                "Invalid point count {}. Must be one of: {:?}",
                self.points, VALID_POINT_COUNTS
            )));
        }

        if self.averaging == 0 {
            return Err(SweepError::Configuration(
                "averaging factor must be a positive integer".to_string(),
            ));
        }

        if !self.start_ghz.is_finite() || self.start_ghz <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "start frequency {} GHz must be a positive number",
                self.start_ghz
            )));
        }

        if !self.stop_ghz.is_finite() || self.stop_ghz <= self.start_ghz {
            return Err(SweepError::Configuration(format!(
                "stop frequency {} GHz must be above start frequency {} GHz",
                self.stop_ghz, self.start_ghz
            )));
        }

        if self.calibration
            && (self.calibration_set == 0 || self.calibration_set > MAX_CALIBRATION_SET)
        {
            return Err(SweepError::Configuration(format!(
                "Invalid calibration set {}. Must be 1-{}",
                self.calibration_set, MAX_CALIBRATION_SET
            )));
        }

        for (name, sequence) in [("bias1", &self.bias1), ("bias2", &self.bias2)] {
            if sequence.values()?.is_empty() {
                return Err(SweepError::Configuration(format!(
                    "'{}' must contain at least one voltage",
                    name
                )));
            }
        }

        Ok(())
    }

    /// The full bias grid, supply 1 outer and supply 2 inner.
    pub fn bias_grid(&self) -> AppResult<BiasGrid> {
        Ok(BiasGrid::new(self.bias1.values()?, self.bias2.values()?))
    }
}
