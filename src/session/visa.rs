//! VISA session for GPIB/USB/Ethernet instruments
//!
//! Wraps the `visa-rs` crate. VISA calls are synchronous, so every transfer runs
//! on Tokio's blocking pool while the sweep awaits it.
//!
//! Supports resource strings like:
//! - "GPIB0::16::INSTR" (GPIB interface)
//! - "USB0::0x0B3E::0x1029::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
//!
//! Without the `instrument_visa` feature, [`VisaSession::open`] fails with
//! [`SweepError::FeatureNotEnabled`].

use crate::error::{AppResult, SweepError};
use crate::session::InstrumentSession;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::attribute::AttrTmoValue;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// Size of one read transfer. A full 401-point FORM4 block fits in one chunk.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
const READ_CHUNK: usize = 64 * 1024;

/// Terminator appended to commands and expected at the end of every response.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
const LINE_TERMINATOR: &str = "\n";

/// Session to one VISA resource.
pub struct VisaSession {
    /// VISA resource string (e.g., "GPIB0::16::INSTR")
    resource: String,

    /// I/O timeout applied to every transfer
    #[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
    timeout: Duration,

    #[cfg(feature = "instrument_visa")]
    instrument: Arc<Mutex<Instrument>>,
}

impl VisaSession {
    /// Open `resource` through the default VISA resource manager.
    ///
    /// # Errors
    /// [`SweepError::Communication`] if the resource manager or the resource
    /// cannot be opened.
    #[cfg(feature = "instrument_visa")]
    pub async fn open(resource: &str, timeout: Duration) -> AppResult<Self> {
        let resource_str = resource.to_string();
        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().map_err(|e| {
                SweepError::Communication(format!(
                    "Failed to create VISA resource manager: {}",
                    e
                ))
            })?;
            let name = std::ffi::CString::new(resource_str.as_str()).map_err(|_| {
                SweepError::Communication(format!(
                    "Invalid VISA resource string: {}",
                    resource_str
                ))
            })?;
            rm.open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| {
                    SweepError::Communication(format!(
                        "Failed to open VISA resource {}: {}",
                        resource_str, e
                    ))
                })
        })
        .await
        .map_err(|e| SweepError::Communication(format!("VISA open task panicked: {}", e)))??;

        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            resource,
            timeout.as_millis()
        );

        Ok(Self {
            resource: resource.to_string(),
            timeout,
            instrument: Arc::new(Mutex::new(instrument)),
        })
    }

    /// Always fails: VISA support is compiled out.
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(resource: &str, timeout: Duration) -> AppResult<Self> {
        let _ = (resource, timeout);
        Err(SweepError::FeatureNotEnabled("instrument_visa".to_string()))
    }

}

/// Program the VISA timeout attribute before a transfer.
#[cfg(feature = "instrument_visa")]
fn apply_timeout(instr: &Instrument, resource: &str, timeout: Duration) -> AppResult<()> {
    let value = AttrTmoValue::new_checked(timeout_millis(timeout)).ok_or_else(|| {
        SweepError::Communication(format!("{}: invalid timeout {:?}", resource, timeout))
    })?;
    instr.set_attr(value).map_err(|e| {
        SweepError::Communication(format!("{}: failed to set VISA timeout: {}", resource, e))
    })
}

/// VISA timeout attribute value, saturating at the attribute's range.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// True once `response` holds a complete message.
///
/// A message ends with the line terminator or with a transfer shorter than the
/// chunk size (the instrument asserted END).
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
fn message_complete(response: &[u8], last_read: usize) -> bool {
    last_read < READ_CHUNK || response.ends_with(LINE_TERMINATOR.as_bytes())
}

#[async_trait]
impl InstrumentSession for VisaSession {
    fn resource(&self) -> &str {
        &self.resource
    }

    #[cfg(feature = "instrument_visa")]
    async fn send(&mut self, command: &str) -> AppResult<()> {
        let payload = format!("{}{}", command, LINE_TERMINATOR);
        let instrument = self.instrument.clone();
        let resource = self.resource.clone();
        let timeout = self.timeout;
        let command_for_log = command.to_string();

        tokio::task::spawn_blocking(move || {
            let mut instr = instrument
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            apply_timeout(&instr, &resource, timeout)?;
            instr.write_all(payload.as_bytes()).map_err(|e| {
                SweepError::Communication(format!(
                    "{}: write failed for '{}': {}",
                    resource, command_for_log, e
                ))
            })?;
            debug!("[{}] <- {}", resource, command_for_log);
            Ok(())
        })
        .await
        .map_err(|e| SweepError::Communication(format!("VISA write task panicked: {}", e)))?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn send(&mut self, _command: &str) -> AppResult<()> {
        Err(SweepError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    #[cfg(feature = "instrument_visa")]
    async fn read(&mut self) -> AppResult<String> {
        let instrument = self.instrument.clone();
        let resource = self.resource.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut instr = instrument
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            apply_timeout(&instr, &resource, timeout)?;
            let mut response = Vec::new();
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let n = instr.read(&mut chunk).map_err(|e| {
                    SweepError::Communication(format!("{}: read failed: {}", resource, e))
                })?;
                response.extend_from_slice(&chunk[..n]);
                if message_complete(&response, n) {
                    break;
                }
            }
            let text = String::from_utf8(response).map_err(|_| {
                SweepError::Protocol(format!("{}: response is not valid text", resource))
            })?;
            debug!("[{}] -> {} bytes", resource, text.len());
            Ok(text)
        })
        .await
        .map_err(|e| SweepError::Communication(format!("VISA read task panicked: {}", e)))?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn read(&mut self) -> AppResult<String> {
        Err(SweepError::FeatureNotEnabled("instrument_visa".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_timeout_becomes_millis() {
        assert_eq!(timeout_millis(Duration::from_secs(5)), 5000);
        assert_eq!(timeout_millis(Duration::from_millis(250)), 250);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn test_full_chunk_ending_in_terminator_completes_message() {
        let mut block = vec![b'0'; READ_CHUNK - 1];
        block.push(b'\n');
        assert!(message_complete(&block, READ_CHUNK));
    }

    #[test]
    fn test_full_chunk_mid_line_needs_another_read() {
        let block = vec![b'0'; READ_CHUNK];
        assert!(!message_complete(&block, READ_CHUNK));
        assert!(message_complete(b"1.0, 2.0", 8));
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn test_open_without_feature() {
        let result = VisaSession::open("GPIB0::16::INSTR", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(SweepError::FeatureNotEnabled(_))));
    }
}
