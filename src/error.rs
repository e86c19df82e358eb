//! Custom error types for the application.
//!
//! This module defines the primary error type, `SweepError`, for the whole sweep.
//! Using the `thiserror` crate, it gives every layer, from instrument sessions up
//! to the orchestrator, one consistent way to report what went wrong.
//!
//! ## Error Hierarchy
//!
//! - **`Communication`**: the transport or instrument is unreachable, timed out, or
//!   rejected a command.
//! - **`Protocol`**: an instrument answered, but the reply could not be parsed as
//!   expected (a non-numeric reading, a malformed data block or network file).
//! - **`DataConsistency`**: the four scattering terms of one bias point disagree on
//!   frequency-grid length.
//! - **`Configuration`**: invalid sweep parameters, detected before any instrument
//!   I/O takes place.
//! - **`Io`**, **`Csv`**, **`Serialization`**, **`ConfigLoad`**: ambient failures from
//!   the filesystem, the CSV writer, serde encoders and the figment loader.
//! - **`FeatureNotEnabled`**: functionality compiled out via feature flags.
//!
//! The orchestrator decides what is fatal: a `Configuration` error stops the run
//! before it starts, while `Communication`/`Protocol`/`DataConsistency` errors raised
//! during a bias point only abort that point.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Every failure the sweep can report.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Transport unreachable, timed out, or command rejected
    #[error("Communication error: {0}")]
    Communication(String),

    /// Reply received but not in the expected form
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Scattering terms disagree on frequency-grid length
    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    /// Invalid settings, found before any instrument I/O
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Settings could not be loaded
    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] figment::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operating-point table could not be written or read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON or TOML encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Functionality compiled out
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<serde_json::Error> for SweepError {
    fn from(err: serde_json::Error) -> Self {
        SweepError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for SweepError {
    fn from(err: toml::ser::Error) -> Self {
        SweepError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SweepError::Communication("GPIB0::16::INSTR timed out".to_string());
        assert_eq!(
            err.to_string(),
            "Communication error: GPIB0::16::INSTR timed out"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SweepError = io.into();
        assert!(matches!(err, SweepError::Io(_)));
    }

    #[test]
    fn test_feature_not_enabled_message() {
        let err = SweepError::FeatureNotEnabled("instrument_visa".into());
        assert!(err.to_string().contains("--features instrument_visa"));
    }
}
