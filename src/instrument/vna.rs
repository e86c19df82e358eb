//! HP 8510-series vector network analyzer controller
//!
//! ## Command set
//!
//! | Operation | Command |
//! |---|---|
//! | Frequency span | `STAR <f> GHz; STOP <f> GHz;` |
//! | Point count | `POIN <n>;` |
//! | ASCII output format | `FORM4` |
//! | Averaging | `AVERON <n>` |
//! | Error correction | `CORRON` + `CALS<k>`, or `CORROFF` |
//! | Select term | `CHAN1; <Sxy>;` |
//! | Trigger and output | `CONT; OUTPDATA` |
//!
//! Captures are strictly sequential: a term is selected and triggered only after
//! the previous term's block has been read completely.

use crate::config::SweepConfig;
use crate::error::AppResult;
use crate::measurement::{BiasPoint, RawCapture, ScatteringTerm};
use crate::session::InstrumentSession;
use std::time::Duration;
use tracing::{debug, info};

/// Network analyzer driven through one session.
pub struct VnaController {
    session: Box<dyn InstrumentSession>,
    acquisition: Duration,
}

impl VnaController {
    /// `acquisition` is the fixed wait between triggering and reading a block.
    /// It has to cover the full averaging time of the configured sweep.
    pub fn new(session: Box<dyn InstrumentSession>, acquisition: Duration) -> Self {
        Self {
            session,
            acquisition,
        }
    }

    /// Resource string of the underlying session.
    pub fn resource(&self) -> &str {
        self.session.resource()
    }

    /// Program frequency span, point count, output format, averaging and
    /// error correction, in that order.
    pub async fn configure(&mut self, config: &SweepConfig) -> AppResult<()> {
        info!(
            "Configuring VNA {}: {}-{} GHz, {} points, averaging {}, calibration {}",
            self.session.resource(),
            config.start_ghz,
            config.stop_ghz,
            config.points,
            config.averaging,
            if config.calibration {
                format!("set {}", config.calibration_set)
            } else {
                "off".to_string()
            }
        );

        self.session
            .send(&format!(
                "STAR {} GHz; STOP {} GHz;",
                config.start_ghz, config.stop_ghz
            ))
            .await?;
        self.session
            .send(&format!("POIN {};", config.points))
            .await?;
        self.session.send("FORM4").await?;
        self.session
            .send(&format!("AVERON {}", config.averaging))
            .await?;
        if config.calibration {
            self.session.send("CORRON").await?;
            self.session
                .send(&format!("CALS{}", config.calibration_set))
                .await?;
        } else {
            self.session.send("CORROFF").await?;
        }
        Ok(())
    }

    /// Select `term`, trigger an acquisition, wait out the averaging and read
    /// the raw data block.
    pub async fn capture_term(
        &mut self,
        term: ScatteringTerm,
        bias: BiasPoint,
    ) -> AppResult<RawCapture> {
        self.session.send(&format!("CHAN1; {};", term)).await?;
        self.session.send("CONT; OUTPDATA").await?;
        debug!("Waiting {:?} for {} acquisition", self.acquisition, term);
        tokio::time::sleep(self.acquisition).await;
        let text = self.session.read().await?;
        debug!("Captured {} ({} bytes)", term, text.len());
        Ok(RawCapture::new(term, bias, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockSession, SimulatedVna};

    fn controller(acquisition: Duration) -> (VnaController, MockSession) {
        let session = MockSession::new("VNA", SimulatedVna::new());
        let handle = session.clone();
        (
            VnaController::new(Box::new(session), acquisition),
            handle,
        )
    }

    #[tokio::test]
    async fn test_configure_with_calibration() {
        let (mut vna, handle) = controller(Duration::ZERO);
        vna.configure(&SweepConfig::default()).await.unwrap();
        assert_eq!(
            handle.commands(),
            vec![
                "STAR 1 GHz; STOP 50 GHz;",
                "POIN 401;",
                "FORM4",
                "AVERON 512",
                "CORRON",
                "CALS1",
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_without_calibration() {
        let (mut vna, handle) = controller(Duration::ZERO);
        let config = SweepConfig {
            start_ghz: 0.5,
            stop_ghz: 26.5,
            points: 51,
            averaging: 8,
            calibration: false,
            ..SweepConfig::default()
        };
        vna.configure(&config).await.unwrap();
        assert_eq!(
            handle.commands(),
            vec![
                "STAR 0.5 GHz; STOP 26.5 GHz;",
                "POIN 51;",
                "FORM4",
                "AVERON 8",
                "CORROFF",
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_stops_at_first_failure() {
        let (mut vna, handle) = controller(Duration::ZERO);
        handle.fail_on("FORM4", 1);
        assert!(vna.configure(&SweepConfig::default()).await.is_err());
        assert_eq!(handle.commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_waits_for_acquisition() {
        let (mut vna, handle) = controller(Duration::from_secs(10));
        let bias = BiasPoint::new(0.2, 0.0);
        let start = tokio::time::Instant::now();
        let capture = vna.capture_term(ScatteringTerm::S12, bias).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(capture.term, ScatteringTerm::S12);
        assert_eq!(capture.bias, bias);
        assert_eq!(capture.parse().unwrap().len(), 201);
        assert_eq!(handle.commands(), vec!["CHAN1; S12;", "CONT; OUTPDATA"]);
    }

    #[tokio::test]
    async fn test_capture_propagates_select_failure() {
        let session = MockSession::new("VNA", SimulatedVna::new());
        session.reply_to("CONT; OUTPDATA", "0.1, 0.2\n");
        let mut vna = VnaController::new(Box::new(session.clone()), Duration::ZERO);
        vna.capture_term(ScatteringTerm::S11, BiasPoint::new(0.0, 0.0))
            .await
            .unwrap();
        session.fail_on("CHAN1; S11;", 2);
        assert!(vna
            .capture_term(ScatteringTerm::S11, BiasPoint::new(0.0, 0.0))
            .await
            .is_err());
    }
}
