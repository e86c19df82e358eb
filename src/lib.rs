//! Core library for the bias_sweep application.
//!
//! This library drives a two-dimensional DC bias sweep of a two-port device
//! under test. At every bias point it records the operating point reported by
//! two regulated power supplies and captures the four S-parameters from a
//! vector network analyzer. Results are written as a CSV operating-point
//! table, verbatim raw captures and one Touchstone file per bias point.
//!
//! The [`sweep::SweepOrchestrator`] sequences everything; instruments are
//! reached through the [`session::InstrumentSession`] trait so the same code
//! runs against VISA hardware or the simulated sessions used in tests.

pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod session;
pub mod sweep;

pub use config::Settings;
pub use error::{AppResult, SweepError};
pub use sweep::{SweepOrchestrator, SweepReport, SweepState};
