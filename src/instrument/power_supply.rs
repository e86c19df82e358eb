//! Regulated DC power supply controller (KIKUSUI PMX-style SCPI).
//!
//! Voltages are not range-checked here. A value the supply refuses surfaces as a
//! communication error; otherwise the supply's own clamping applies.

use crate::error::AppResult;
use crate::session::InstrumentSession;
use tracing::debug;

/// One supply driven through one session.
pub struct PowerSupply {
    name: String,
    session: Box<dyn InstrumentSession>,
}

impl PowerSupply {
    /// Wrap `session`; `name` labels log lines.
    pub fn new(name: &str, session: Box<dyn InstrumentSession>) -> Self {
        Self {
            name: name.to_string(),
            session,
        }
    }

    /// Label used in logs and shutdown errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource string of the underlying session.
    pub fn resource(&self) -> &str {
        self.session.resource()
    }

    /// Command the output voltage.
    pub async fn set_voltage(&mut self, volts: f64) -> AppResult<()> {
        debug!("{}: set {} V", self.name, volts);
        self.session.send(&format!("VOLT {}", volts)).await
    }

    /// Switch the output on or off.
    pub async fn enable_output(&mut self, on: bool) -> AppResult<()> {
        debug!("{}: output {}", self.name, if on { "on" } else { "off" });
        self.session
            .send(if on { "OUTP ON" } else { "OUTP OFF" })
            .await
    }

    /// Measured (voltage, current). Both queries must succeed.
    pub async fn read_operating_point(&mut self) -> AppResult<(f64, f64)> {
        let voltage = self.session.query_f64("MEAS:VOLT?").await?;
        let current = self.session.query_f64("MEAS:CURR?").await?;
        debug!("{}: {} V, {} A", self.name, voltage, current);
        Ok((voltage, current))
    }
}
