//! Touchstone (v1) two-port network files.
//!
//! Files are written with the option line `# GHz S RI R 50` and one line per
//! frequency in the two-port order `f S11 S21 S12 S22`. Values use Rust's
//! shortest round-trip float formatting, so reading a written file reproduces
//! the stored complex values exactly and the frequencies to within the GHz
//! scaling error.
//!
//! The reader accepts any frequency unit, the RI/MA/DB formats, any reference
//! impedance and `!` comments; option fields that are absent take the
//! Touchstone defaults (`GHz S MA R 50`).

use crate::error::{AppResult, SweepError};
use crate::measurement::{BiasPoint, FrequencyGrid, SParameterSet};
use num_complex::Complex64;
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

/// Column order of the four terms on a two-port data line, as (row, column).
const DATA_ORDER: [(usize, usize); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Values per data line: frequency plus four complex pairs.
const VALUES_PER_POINT: usize = 9;

/// Complex number representation on data lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexFormat {
    /// Real / imaginary
    RealImag,
    /// Linear magnitude / angle in degrees
    MagAngle,
    /// Magnitude in dB / angle in degrees
    DbAngle,
}

impl ComplexFormat {
    fn to_complex(self, a: f64, b: f64) -> Complex64 {
        match self {
            ComplexFormat::RealImag => Complex64::new(a, b),
            ComplexFormat::MagAngle => Complex64::from_polar(a, b.to_radians()),
            ComplexFormat::DbAngle => Complex64::from_polar(10f64.powf(a / 20.0), b.to_radians()),
        }
    }
}

/// A two-port S-parameter network as read from a Touchstone file.
#[derive(Debug, Clone, PartialEq)]
pub struct Network2Port {
    /// Frequency grid in Hz
    pub frequency: FrequencyGrid,
    /// One 2x2 matrix per frequency, `[row][col]`
    pub matrices: Vec<[[Complex64; 2]; 2]>,
    /// Reference impedance from the option line
    pub reference_ohms: f64,
    /// Comment lines without the leading `!`
    pub comments: Vec<String>,
}

impl Network2Port {
    /// Bias pair recorded in the file header by [`write_touchstone`], if any.
    pub fn bias(&self) -> Option<BiasPoint> {
        static BIAS_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = BIAS_RE
            .get_or_init(|| {
                Regex::new(r"(?i)^bias:\s*v1\s*=\s*(?P<v1>[-+0-9.eE]+)\s*v,\s*v2\s*=\s*(?P<v2>[-+0-9.eE]+)\s*v")
                    .ok()
            })
            .as_ref()?;
        self.comments.iter().find_map(|line| {
            let caps = re.captures(line.trim())?;
            Some(BiasPoint::new(
                caps["v1"].parse().ok()?,
                caps["v2"].parse().ok()?,
            ))
        })
    }

    /// Attach a bias point, yielding the measurement-model type.
    pub fn into_sparameter_set(self, bias: BiasPoint) -> AppResult<SParameterSet> {
        SParameterSet::new(bias, self.frequency, self.matrices)
    }
}

/// Render a set as Touchstone text.
pub fn to_touchstone(set: &SParameterSet, created: &str) -> String {
    let mut out = String::with_capacity(set.frequency().len() * 160 + 256);
    let _ = writeln!(out, "! Two-port S-parameters written by bias_sweep");
    let _ = writeln!(out, "! Created: {}", created);
    let _ = writeln!(
        out,
        "! Bias: V1 = {} V, V2 = {} V",
        set.bias.v1, set.bias.v2
    );
    let _ = writeln!(out, "! Data order: f S11 S21 S12 S22");
    let _ = writeln!(out, "# GHz S RI R 50");

    for (hz, matrix) in set.frequency().hz().iter().zip(set.matrices()) {
        let _ = write!(out, "{}", hz / 1e9);
        for (row, col) in DATA_ORDER {
            let value = matrix[row][col];
            let _ = write!(out, " {} {}", value.re, value.im);
        }
        out.push('\n');
    }
    out
}

/// Write a set to `path`.
pub fn write_touchstone(path: &Path, set: &SParameterSet) -> AppResult<()> {
    let created = chrono::Utc::now().to_rfc3339();
    std::fs::write(path, to_touchstone(set, &created))?;
    Ok(())
}

/// Read a two-port Touchstone file.
pub fn read_touchstone(path: &Path) -> AppResult<Network2Port> {
    let text = std::fs::read_to_string(path)?;
    parse_touchstone(&text).map_err(|e| match e {
        SweepError::Protocol(msg) => SweepError::Protocol(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse two-port Touchstone text.
pub fn parse_touchstone(text: &str) -> AppResult<Network2Port> {
    let mut scale = 1e9;
    let mut format = ComplexFormat::MagAngle;
    let mut reference_ohms = 50.0;
    let mut comments = Vec::new();
    let mut seen_options = false;
    let mut values: Vec<f64> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let (body, comment) = match line.find('!') {
            Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
            None => (line, None),
        };
        if let Some(comment) = comment {
            comments.push(comment.trim().to_string());
        }
        let body = body.trim();
        if body.is_empty() {
            continue;
        }

        if let Some(options) = body.strip_prefix('#') {
            if seen_options {
                continue;
            }
            seen_options = true;
            let mut tokens = options.split_whitespace();
            while let Some(token) = tokens.next() {
                match token.to_ascii_lowercase().as_str() {
                    "hz" => scale = 1.0,
                    "khz" => scale = 1e3,
                    "mhz" => scale = 1e6,
                    "ghz" => scale = 1e9,
                    "s" => {}
                    "y" | "z" | "h" | "g" => {
                        return Err(SweepError::Protocol(format!(
                            "line {}: only S-parameters are supported, found '{}'",
                            lineno + 1,
                            token
                        )))
                    }
                    "ri" => format = ComplexFormat::RealImag,
                    "ma" => format = ComplexFormat::MagAngle,
                    "db" => format = ComplexFormat::DbAngle,
                    "r" => {
                        reference_ohms = tokens
                            .next()
                            .and_then(|r| r.parse().ok())
                            .ok_or_else(|| {
                                SweepError::Protocol(format!(
                                    "line {}: missing reference impedance",
                                    lineno + 1
                                ))
                            })?;
                    }
                    other => {
                        return Err(SweepError::Protocol(format!(
                            "line {}: unknown option '{}'",
                            lineno + 1,
                            other
                        )))
                    }
                }
            }
            continue;
        }

        for field in body.split_whitespace() {
            values.push(field.parse().map_err(|_| {
                SweepError::Protocol(format!(
                    "line {}: '{}' is not a number",
                    lineno + 1,
                    field
                ))
            })?);
        }
    }

    if values.len() % VALUES_PER_POINT != 0 {
        return Err(SweepError::Protocol(format!(
            "{} data values do not form complete two-port records",
            values.len()
        )));
    }

    let mut hz = Vec::with_capacity(values.len() / VALUES_PER_POINT);
    let mut matrices = Vec::with_capacity(values.len() / VALUES_PER_POINT);
    for record in values.chunks_exact(VALUES_PER_POINT) {
        hz.push(record[0] * scale);
        let mut matrix = [[Complex64::new(0.0, 0.0); 2]; 2];
        for (k, (row, col)) in DATA_ORDER.into_iter().enumerate() {
            matrix[row][col] = format.to_complex(record[1 + 2 * k], record[2 + 2 * k]);
        }
        matrices.push(matrix);
    }

    Ok(Network2Port {
        frequency: FrequencyGrid::from_hz(hz)
            .map_err(|_| SweepError::Protocol("frequencies are not increasing".to_string()))?,
        matrices,
        reference_ohms,
        comments,
    })
}
