//! Common test utilities for bias_sweep integration tests
//!
//! A [`Bench`] wires the simulated VNA and supplies into an
//! [`InstrumentSessions`] while keeping handles for inspecting command logs
//! and injecting failures.

#![allow(dead_code)] // Not every scenario uses every helper

use bias_sweep::config::VoltageSequence;
use bias_sweep::session::{InstrumentSessions, MockSession, SimulatedSupply, SimulatedVna};
use bias_sweep::Settings;
use std::path::Path;
use std::time::Duration;

/// Simulated instruments with shared-state handles.
pub struct Bench {
    pub vna: MockSession,
    pub supply1: MockSession,
    pub supply2: MockSession,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_vna(SimulatedVna::new())
    }

    pub fn with_vna(vna: SimulatedVna) -> Self {
        Self {
            vna: MockSession::new("GPIB0::16::INSTR", vna),
            supply1: MockSession::new("GPIB0::5::INSTR", SimulatedSupply::new(100.0)),
            supply2: MockSession::new("GPIB0::6::INSTR", SimulatedSupply::new(50.0)),
        }
    }

    /// Sessions to hand to the orchestrator. Clones share state with `self`.
    pub fn sessions(&self) -> InstrumentSessions {
        InstrumentSessions {
            vna: Box::new(self.vna.clone()),
            supply1: Box::new(self.supply1.clone()),
            supply2: Box::new(self.supply2.clone()),
        }
    }
}

/// Small sweep writing under `output`: 51 frequency points and a 2x2 grid
/// `(0.0, 0.0), (0.0, 1.2), (1.2, 0.0), (1.2, 1.2)`.
pub fn small_sweep(output: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.sweep.points = 51;
    settings.sweep.averaging = 16;
    settings.sweep.bias1 = VoltageSequence::List(vec![0.0, 1.2]);
    settings.sweep.bias2 = VoltageSequence::List(vec![0.0, 1.2]);
    settings.timing.settle = Duration::from_secs(5);
    settings.timing.acquisition = Duration::from_secs(10);
    settings.storage.output_dir = output.to_path_buf();
    settings
}

/// Last `n` commands of a log, oldest first.
pub fn tail(commands: &[String], n: usize) -> Vec<String> {
    commands[commands.len().saturating_sub(n)..].to_vec()
}
