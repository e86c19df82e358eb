//! S-parameter data: raw VNA captures, their parsed traces, and the assembled
//! two-port set written as one network file per bias point.

use crate::error::{AppResult, SweepError};
use crate::measurement::BiasPoint;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// One of the four scattering terms of a two-port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScatteringTerm {
    /// Input reflection
    S11,
    /// Reverse transmission
    S12,
    /// Forward transmission
    S21,
    /// Output reflection
    S22,
}

impl ScatteringTerm {
    /// Capture order used for every bias point.
    pub const ALL: [ScatteringTerm; 4] = [
        ScatteringTerm::S11,
        ScatteringTerm::S12,
        ScatteringTerm::S21,
        ScatteringTerm::S22,
    ];

    /// Name as used in VNA commands and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScatteringTerm::S11 => "S11",
            ScatteringTerm::S12 => "S12",
            ScatteringTerm::S21 => "S21",
            ScatteringTerm::S22 => "S22",
        }
    }

    /// (row, column) of the term in the 2x2 matrix.
    pub fn position(&self) -> (usize, usize) {
        match self {
            ScatteringTerm::S11 => (0, 0),
            ScatteringTerm::S12 => (0, 1),
            ScatteringTerm::S21 => (1, 0),
            ScatteringTerm::S22 => (1, 1),
        }
    }

    fn index(&self) -> usize {
        let (row, col) = self.position();
        row * 2 + col
    }
}

impl std::fmt::Display for ScatteringTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unparsed block returned by the VNA for one term at one bias point.
///
/// Persisted verbatim before parsing so a parse failure never loses data.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCapture {
    /// Captured term
    pub term: ScatteringTerm,
    /// Bias point the capture belongs to
    pub bias: BiasPoint,
    /// Verbatim instrument response
    pub text: String,
}

impl RawCapture {
    /// Wrap a response block.
    pub fn new(term: ScatteringTerm, bias: BiasPoint, text: String) -> Self {
        Self { term, bias, text }
    }

    /// Parse the FORM4 block into complex samples.
    pub fn parse(&self) -> AppResult<Vec<Complex64>> {
        parse_form4(&self.text).map_err(|e| match e {
            SweepError::Protocol(msg) => {
                SweepError::Protocol(format!("{} at {}: {}", self.term, self.bias, msg))
            }
            other => other,
        })
    }
}

/// Parse an ASCII (FORM4) data block: one `re, im` pair per line.
///
/// Blank lines are skipped. Anything else that is not two comma-separated
/// decimal numbers is a protocol error naming the 1-based line.
pub fn parse_form4(text: &str) -> AppResult<Vec<Complex64>> {
    let mut samples = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (Some(re), Some(im), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(SweepError::Protocol(format!(
                "line {}: expected 're, im', got '{}'",
                lineno + 1,
                line
            )));
        };
        let parse = |field: &str| {
            field.parse::<f64>().map_err(|_| {
                SweepError::Protocol(format!(
                    "line {}: '{}' is not a decimal number",
                    lineno + 1,
                    field
                ))
            })
        };
        samples.push(Complex64::new(parse(re)?, parse(im)?));
    }
    Ok(samples)
}

/// Monotonically increasing frequency points, stored in Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyGrid {
    hz: Vec<f64>,
}

impl FrequencyGrid {
    /// Evenly spaced points from `start_ghz` to `stop_ghz` inclusive.
    pub fn linear_ghz(start_ghz: f64, stop_ghz: f64, points: usize) -> Self {
        let (start, stop) = (start_ghz * 1e9, stop_ghz * 1e9);
        let hz = match points {
            0 => Vec::new(),
            1 => vec![start],
            n => {
                let step = (stop - start) / (n - 1) as f64;
                (0..n).map(|i| start + i as f64 * step).collect()
            }
        };
        Self { hz }
    }

    /// Wrap explicit frequencies; they must be strictly increasing.
    pub fn from_hz(hz: Vec<f64>) -> AppResult<Self> {
        if hz.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(SweepError::DataConsistency(
                "frequency grid is not strictly increasing".to_string(),
            ));
        }
        Ok(Self { hz })
    }

    /// Frequencies in Hz.
    pub fn hz(&self) -> &[f64] {
        &self.hz
    }

    /// Number of frequency points.
    pub fn len(&self) -> usize {
        self.hz.len()
    }

    /// True for an empty grid.
    pub fn is_empty(&self) -> bool {
        self.hz.is_empty()
    }
}

/// Parsed traces keyed by scattering term.
///
/// A fixed four-slot table filled as terms are captured; assembly requires all
/// four.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermTraces {
    slots: [Option<Vec<Complex64>>; 4],
}

impl TermTraces {
    /// No terms recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the parsed trace of `term`, replacing any earlier one.
    pub fn insert(&mut self, term: ScatteringTerm, trace: Vec<Complex64>) {
        self.slots[term.index()] = Some(trace);
    }

    /// Trace of `term`, if recorded.
    pub fn get(&self, term: ScatteringTerm) -> Option<&[Complex64]> {
        self.slots[term.index()].as_deref()
    }
}

/// Four scattering terms over one frequency grid, as 2x2 matrices per frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct SParameterSet {
    /// Bias point the set was measured at
    pub bias: BiasPoint,
    frequency: FrequencyGrid,
    matrices: Vec<[[Complex64; 2]; 2]>,
}

impl SParameterSet {
    /// Build a set directly from matrices (used when reading network files).
    pub fn new(
        bias: BiasPoint,
        frequency: FrequencyGrid,
        matrices: Vec<[[Complex64; 2]; 2]>,
    ) -> AppResult<Self> {
        if matrices.len() != frequency.len() {
            return Err(SweepError::DataConsistency(format!(
                "{} matrices for {} frequency points",
                matrices.len(),
                frequency.len()
            )));
        }
        Ok(Self {
            bias,
            frequency,
            matrices,
        })
    }

    /// Assemble the four captured traces onto the configured frequency grid.
    ///
    /// # Errors
    ///
    /// [`SweepError::DataConsistency`] if a term is missing or any trace length
    /// differs from the others or from the frequency grid.
    pub fn assemble(
        bias: BiasPoint,
        frequency: FrequencyGrid,
        traces: &TermTraces,
    ) -> AppResult<Self> {
        let mut lengths = Vec::with_capacity(4);
        for term in ScatteringTerm::ALL {
            let trace = traces.get(term).ok_or_else(|| {
                SweepError::DataConsistency(format!("{} missing at {}", term, bias))
            })?;
            lengths.push((term, trace.len()));
        }

        if lengths.iter().any(|&(_, len)| len != frequency.len()) {
            let detail = lengths
                .iter()
                .map(|(term, len)| format!("{}={}", term, len))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(SweepError::DataConsistency(format!(
                "trace lengths differ at {} (expected {} points): {}",
                bias,
                frequency.len(),
                detail
            )));
        }

        let mut matrices = vec![[[Complex64::new(0.0, 0.0); 2]; 2]; frequency.len()];
        for term in ScatteringTerm::ALL {
            let (row, col) = term.position();
            if let Some(trace) = traces.get(term) {
                for (matrix, value) in matrices.iter_mut().zip(trace) {
                    matrix[row][col] = *value;
                }
            }
        }

        Ok(Self {
            bias,
            frequency,
            matrices,
        })
    }

    /// Frequency grid.
    pub fn frequency(&self) -> &FrequencyGrid {
        &self.frequency
    }

    /// One 2x2 matrix per frequency point.
    pub fn matrices(&self) -> &[[[Complex64; 2]; 2]] {
        &self.matrices
    }

    /// Samples of one term across the grid.
    pub fn term(&self, term: ScatteringTerm) -> Vec<Complex64> {
        let (row, col) = term.position();
        self.matrices.iter().map(|m| m[row][col]).collect()
    }
}
