//! Instrument sessions
//!
//! An [`InstrumentSession`] is a bidirectional command/query channel to one
//! instrument. It knows nothing about what the commands mean; the controllers in
//! [`crate::instrument`] build the command strings.
//!
//! Two implementations are provided:
//! - [`VisaSession`] talks to GPIB/USB/LAN hardware through the VISA library
//!   (feature `instrument_visa`).
//! - [`MockSession`] records every command and answers through a [`Responder`];
//!   [`SimulatedVna`] and [`SimulatedSupply`] emulate the bench instruments.
//!
//! No retries are performed at this layer. Every failure is returned to the
//! caller as a [`SweepError::Communication`] or [`SweepError::Protocol`].

pub mod mock;
pub mod visa;

pub use mock::{MockSession, Responder, SimulatedSupply, SimulatedVna};
pub use visa::VisaSession;

use crate::config::InstrumentsConfig;
use crate::error::{AppResult, SweepError};
use async_trait::async_trait;
use tracing::info;

/// Command/query channel to a single instrument.
#[async_trait]
pub trait InstrumentSession: Send {
    /// Resource identifier used in log and error messages.
    fn resource(&self) -> &str;

    /// Send a command that produces no immediate reply.
    ///
    /// # Errors
    /// [`SweepError::Communication`] if the transport is unreachable or the
    /// instrument rejects the command.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Read the pending response block.
    ///
    /// # Errors
    /// [`SweepError::Communication`] on timeout or transport failure.
    async fn read(&mut self) -> AppResult<String>;

    /// Send a command and read its reply.
    async fn query(&mut self, command: &str) -> AppResult<String> {
        self.send(command).await?;
        self.read().await
    }

    /// Query a single decimal number.
    ///
    /// # Errors
    /// [`SweepError::Protocol`] if the reply is not a decimal number.
    async fn query_f64(&mut self, command: &str) -> AppResult<f64> {
        let reply = self.query(command).await?;
        reply.trim().parse::<f64>().map_err(|_| {
            SweepError::Protocol(format!(
                "{}: '{}' returned '{}', expected a decimal number",
                self.resource(),
                command,
                reply.trim()
            ))
        })
    }
}

/// The three sessions a sweep needs, owned for the whole run.
pub struct InstrumentSessions {
    /// Network analyzer
    pub vna: Box<dyn InstrumentSession>,
    /// Power supply 1
    pub supply1: Box<dyn InstrumentSession>,
    /// Power supply 2
    pub supply2: Box<dyn InstrumentSession>,
}

impl InstrumentSessions {
    /// Open VISA sessions to every configured instrument.
    ///
    /// # Errors
    /// Fails if any instrument cannot be opened; no sweep can proceed without all
    /// three.
    pub async fn open(config: &InstrumentsConfig) -> AppResult<Self> {
        let vna = VisaSession::open(&config.vna, config.timeout).await?;
        let supply1 = VisaSession::open(&config.supply1, config.timeout).await?;
        let supply2 = VisaSession::open(&config.supply2, config.timeout).await?;
        info!(
            "Opened instruments: VNA {}, supply 1 {}, supply 2 {}",
            config.vna, config.supply1, config.supply2
        );
        Ok(Self {
            vna: Box::new(vna),
            supply1: Box::new(supply1),
            supply2: Box::new(supply2),
        })
    }

    /// Simulated bench: an emulated VNA and two supplies driving ohmic loads.
    pub fn simulated(config: &InstrumentsConfig) -> Self {
        Self {
            vna: Box::new(MockSession::new(&config.vna, SimulatedVna::new())),
            supply1: Box::new(MockSession::new(
                &config.supply1,
                SimulatedSupply::new(100.0),
            )),
            supply2: Box::new(MockSession::new(
                &config.supply2,
                SimulatedSupply::new(50.0),
            )),
        }
    }
}
