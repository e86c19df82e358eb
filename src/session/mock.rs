//! Mock sessions for testing and simulation
//!
//! [`MockSession`] stands in for real hardware. It provides:
//! - A command log for test verification
//! - Pluggable behaviour through a [`Responder`]
//! - Failure injection on the n-th occurrence of a command
//! - Canned replies that override the responder
//!
//! Clones share state, so a test can keep one handle while the orchestrator
//! owns another and inspect the command log afterwards.
//!
//! # Example
//!
//! ```
//! use bias_sweep::session::{InstrumentSession, MockSession, SimulatedSupply};
//!
//! # tokio_test_block_on(async {
//! let mut supply = MockSession::new("PSU1", SimulatedSupply::new(100.0));
//! let handle = supply.clone();
//! supply.send("VOLT 1.0").await.unwrap();
//! assert_eq!(handle.commands(), vec!["VOLT 1.0".to_string()]);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::error::{AppResult, SweepError};
use crate::measurement::ScatteringTerm;
use crate::session::InstrumentSession;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Instrument behaviour behind a [`MockSession`].
pub trait Responder: Send {
    /// Handle one command.
    ///
    /// `Ok(Some(reply))` queues a reply for the next read, `Ok(None)` accepts the
    /// command silently and `Err(reason)` rejects it.
    fn respond(&mut self, command: &str) -> Result<Option<String>, String>;
}

struct MockState {
    responder: Box<dyn Responder>,
    log: Vec<String>,
    pending: VecDeque<String>,
    seen: HashMap<String, usize>,
    failures: Vec<(String, usize)>,
    canned: HashMap<String, String>,
}

/// Shared-state mock session.
#[derive(Clone)]
pub struct MockSession {
    resource: String,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    /// Create a mock session named `resource` driven by `responder`.
    pub fn new(resource: &str, responder: impl Responder + 'static) -> Self {
        Self {
            resource: resource.to_string(),
            state: Arc::new(Mutex::new(MockState {
                responder: Box::new(responder),
                log: Vec::new(),
                pending: VecDeque::new(),
                seen: HashMap::new(),
                failures: Vec::new(),
                canned: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every command sent so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Clear the command log
    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Fail the `occurrence`-th (1-based) send of `command` with a communication
    /// error. The command still appears in the log.
    pub fn fail_on(&self, command: &str, occurrence: usize) {
        self.state().failures.push((command.to_string(), occurrence));
    }

    /// Always answer `command` with `reply`, bypassing the responder.
    pub fn reply_to(&self, command: &str, reply: &str) {
        self.state()
            .canned
            .insert(command.to_string(), reply.to_string());
    }
}

#[async_trait]
impl InstrumentSession for MockSession {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.state();
        state.log.push(command.to_string());
        debug!("[{}] <- {}", self.resource, command);

        let count = {
            let seen = state.seen.entry(command.to_string()).or_insert(0);
            *seen += 1;
            *seen
        };
        if state
            .failures
            .iter()
            .any(|(cmd, occurrence)| cmd == command && *occurrence == count)
        {
            return Err(SweepError::Communication(format!(
                "{}: injected failure on '{}'",
                self.resource, command
            )));
        }

        if let Some(reply) = state.canned.get(command).cloned() {
            state.pending.push_back(reply);
            return Ok(());
        }

        match state.responder.respond(command) {
            Ok(Some(reply)) => {
                state.pending.push_back(reply);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(reason) => Err(SweepError::Communication(format!(
                "{} rejected '{}': {}",
                self.resource, command, reason
            ))),
        }
    }

    async fn read(&mut self) -> AppResult<String> {
        let reply = self.state().pending.pop_front();
        reply.ok_or_else(|| {
            SweepError::Communication(format!(
                "{}: read timed out, no response pending",
                self.resource
            ))
        })
    }
}

// ============================================================================
// Simulated network analyzer
// ============================================================================

/// Emulates the network analyzer's command set.
///
/// `OUTPDATA` produces an ASCII block of `re, im` lines, one per point of the
/// last `POIN` setting, for the currently selected scattering term.
#[derive(Debug, Clone)]
pub struct SimulatedVna {
    points: usize,
    selected: ScatteringTerm,
    length_overrides: HashMap<ScatteringTerm, usize>,
    corrupt: Vec<ScatteringTerm>,
}

impl Default for SimulatedVna {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVna {
    /// Analyzer set to 201 points with S11 selected.
    pub fn new() -> Self {
        Self {
            points: 201,
            selected: ScatteringTerm::S11,
            length_overrides: HashMap::new(),
            corrupt: Vec::new(),
        }
    }

    /// Return `points` samples for `term` regardless of the `POIN` setting.
    pub fn with_trace_length(mut self, term: ScatteringTerm, points: usize) -> Self {
        self.length_overrides.insert(term, points);
        self
    }

    /// Return an unparseable block for `term`.
    pub fn with_corrupt_term(mut self, term: ScatteringTerm) -> Self {
        self.corrupt.push(term);
        self
    }

    fn data_block(&self) -> String {
        if self.corrupt.contains(&self.selected) {
            return "#?GARBLED-BLOCK?#\n".to_string();
        }
        let points = self
            .length_overrides
            .get(&self.selected)
            .copied()
            .unwrap_or(self.points);
        let (magnitude, delay) = match self.selected {
            ScatteringTerm::S11 => (0.6, 0.5),
            ScatteringTerm::S12 => (0.05, 1.0),
            ScatteringTerm::S21 => (4.0, 1.0),
            ScatteringTerm::S22 => (0.4, 0.7),
        };
        let mut block = String::with_capacity(points * 32);
        for i in 0..points {
            let phase = -std::f64::consts::TAU * delay * i as f64 / points.max(1) as f64;
            block.push_str(&format!(
                "{:.6E}, {:.6E}\n",
                magnitude * phase.cos(),
                magnitude * phase.sin()
            ));
        }
        block
    }
}

impl Responder for SimulatedVna {
    fn respond(&mut self, command: &str) -> Result<Option<String>, String> {
        let command = command.trim();
        if let Some(rest) = command.strip_prefix("POIN ") {
            self.points = rest
                .trim_end_matches(';')
                .trim()
                .parse()
                .map_err(|_| format!("bad point count '{}'", rest))?;
            return Ok(None);
        }
        if let Some(rest) = command.strip_prefix("CHAN1;") {
            let term = rest.trim().trim_end_matches(';').trim();
            self.selected = ScatteringTerm::ALL
                .into_iter()
                .find(|t| t.as_str() == term)
                .ok_or_else(|| format!("unknown parameter '{}'", term))?;
            return Ok(None);
        }
        if command.ends_with("OUTPDATA") {
            return Ok(Some(self.data_block()));
        }
        const ACCEPTED: [&str; 6] = ["STAR ", "FORM4", "AVERON", "CORRON", "CORROFF", "CALS"];
        if ACCEPTED.iter().any(|prefix| command.starts_with(prefix)) {
            Ok(None)
        } else {
            Err("unknown command".to_string())
        }
    }
}

// ============================================================================
// Simulated power supply
// ============================================================================

/// Emulates a regulated supply driving an ohmic load.
#[derive(Debug, Clone)]
pub struct SimulatedSupply {
    load_ohms: f64,
    voltage: f64,
    output: bool,
}

impl SimulatedSupply {
    /// Supply with output off driving `load_ohms`.
    pub fn new(load_ohms: f64) -> Self {
        Self {
            load_ohms,
            voltage: 0.0,
            output: false,
        }
    }

    fn terminal_voltage(&self) -> f64 {
        if self.output {
            self.voltage
        } else {
            0.0
        }
    }
}

impl Responder for SimulatedSupply {
    fn respond(&mut self, command: &str) -> Result<Option<String>, String> {
        match command.trim() {
            "OUTP ON" => {
                self.output = true;
                Ok(None)
            }
            "OUTP OFF" => {
                self.output = false;
                Ok(None)
            }
            "MEAS:VOLT?" => Ok(Some(format!("{:E}", self.terminal_voltage()))),
            "MEAS:CURR?" => Ok(Some(format!(
                "{:E}",
                self.terminal_voltage() / self.load_ohms
            ))),
            other => match other.strip_prefix("VOLT ") {
                Some(value) => {
                    self.voltage = value
                        .trim()
                        .parse()
                        .map_err(|_| format!("bad voltage '{}'", value))?;
                    Ok(None)
                }
                None => Err("unknown command".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::parse_form4;

    #[tokio::test]
    async fn test_call_logging() {
        let mut session = MockSession::new("PSU", SimulatedSupply::new(10.0));
        let handle = session.clone();
        session.send("VOLT 0.5").await.unwrap();
        session.send("OUTP ON").await.unwrap();
        assert_eq!(handle.commands(), vec!["VOLT 0.5", "OUTP ON"]);
        handle.clear_log();
        assert!(session.commands().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection_hits_only_requested_occurrence() {
        let mut session = MockSession::new("PSU", SimulatedSupply::new(10.0));
        session.fail_on("OUTP ON", 2);
        session.send("OUTP ON").await.unwrap();
        let err = session.send("OUTP ON").await.unwrap_err();
        assert!(matches!(err, SweepError::Communication(_)));
        session.send("OUTP ON").await.unwrap();
        assert_eq!(session.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_read_without_pending_reply_times_out() {
        let mut session = MockSession::new("PSU", SimulatedSupply::new(10.0));
        let err = session.read().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let mut session = MockSession::new("PSU", SimulatedSupply::new(10.0));
        let err = session.send("*RST").await.unwrap_err();
        assert!(err.to_string().contains("rejected '*RST'"));
    }

    #[tokio::test]
    async fn test_supply_readback_follows_output_state() {
        let mut session = MockSession::new("PSU", SimulatedSupply::new(200.0));
        session.send("VOLT 1.0").await.unwrap();
        assert_eq!(session.query_f64("MEAS:VOLT?").await.unwrap(), 0.0);
        session.send("OUTP ON").await.unwrap();
        assert_eq!(session.query_f64("MEAS:VOLT?").await.unwrap(), 1.0);
        assert_eq!(session.query_f64("MEAS:CURR?").await.unwrap(), 0.005);
    }

    #[tokio::test]
    async fn test_vna_block_follows_point_count() {
        let mut session = MockSession::new("VNA", SimulatedVna::new());
        session.send("POIN 51;").await.unwrap();
        session.send("CHAN1; S21;").await.unwrap();
        let block = session.query("CONT; OUTPDATA").await.unwrap();
        let samples = parse_form4(&block).unwrap();
        assert_eq!(samples.len(), 51);
        assert!((samples[0].norm() - 4.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_vna_overrides() {
        let vna = SimulatedVna::new()
            .with_trace_length(ScatteringTerm::S12, 7)
            .with_corrupt_term(ScatteringTerm::S22);
        let mut session = MockSession::new("VNA", vna);
        session.send("CHAN1; S12;").await.unwrap();
        let block = session.query("CONT; OUTPDATA").await.unwrap();
        assert_eq!(parse_form4(&block).unwrap().len(), 7);

        session.send("CHAN1; S22;").await.unwrap();
        let block = session.query("CONT; OUTPDATA").await.unwrap();
        assert!(parse_form4(&block).is_err());
    }
}
