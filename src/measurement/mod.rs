//! Measurement data model.
//!
//! Pure data: bias points and the grid they are visited in, the operating point
//! recorded at each of them, and the S-parameter set assembled from four raw
//! VNA captures. None of these types perform I/O.

pub mod bias;
pub mod sparams;

pub use bias::{voltage_tag, BiasGrid, BiasPoint, OperatingPoint};
pub use sparams::{
    parse_form4, FrequencyGrid, RawCapture, SParameterSet, ScatteringTerm, TermTraces,
};
