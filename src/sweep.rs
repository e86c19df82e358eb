//! Sweep orchestration
//!
//! The [`SweepOrchestrator`] walks the bias grid and drives the instruments
//! through a fixed sequence of states:
//!
//! ```text
//! Initializing -> ConfiguringInstruments
//!     -> (ApplyingBias -> Settling -> MeasuringOperatingPoint
//!         -> MeasuringSParameters -> PersistingResults)*   once per bias point
//!     -> ShuttingDown -> Done
//! ```
//!
//! ## Error policy
//!
//! - Invalid settings are rejected by [`SweepOrchestrator::new`], before any
//!   instrument I/O.
//! - A failure while configuring the VNA aborts the run after safe shutdown.
//! - A failure inside a bias point aborts only that point. It is recorded in the
//!   [`SweepReport`] with the state it happened in and the sweep moves on.
//! - Safe shutdown (0 V, outputs off, supply 1 then supply 2) always runs after
//!   the grid loop. Its own failures are logged and reported, never raised.
//!
//! Everything runs sequentially on one task. The settle and acquisition waits
//! are plain `tokio::time::sleep` calls on configured durations.

use crate::config::{Settings, TimingConfig};
use crate::data::storage::CONFIG_SNAPSHOT_FILE;
use crate::data::DataRecorder;
use crate::error::{AppResult, SweepError};
use crate::instrument::{PowerSupply, VnaController};
use crate::measurement::{
    BiasGrid, BiasPoint, FrequencyGrid, OperatingPoint, SParameterSet, ScatteringTerm, TermTraces,
};
use crate::session::InstrumentSessions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    /// Preparing output directory and settings snapshot
    Initializing,
    /// Programming the network analyzer
    ConfiguringInstruments,
    /// Commanding both supplies
    ApplyingBias,
    /// Waiting for the bias to settle
    Settling,
    /// Reading back supply voltage and current
    MeasuringOperatingPoint,
    /// Capturing the four scattering terms
    MeasuringSParameters,
    /// Assembling and writing the network file
    PersistingResults,
    /// Returning supplies to 0 V, outputs off
    ShuttingDown,
    /// Run finished
    Done,
}

/// Why a bias point did not produce a network file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointFailure {
    /// State the point was in when it failed
    pub stage: SweepState,
    /// Error text
    pub message: String,
}

/// What one bias point produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointOutcome {
    /// Zero-based position in grid order
    pub index: usize,
    /// Commanded bias
    pub bias: BiasPoint,
    /// Recorded row, if the point got that far
    pub operating_point: Option<OperatingPoint>,
    /// Raw capture files written for this point
    pub raw_captures: Vec<PathBuf>,
    /// Touchstone file, present only on success
    pub network_file: Option<PathBuf>,
    /// Set when the point failed
    pub failure: Option<PointFailure>,
}

impl PointOutcome {
    fn new(index: usize, bias: BiasPoint) -> Self {
        Self {
            index,
            bias,
            operating_point: None,
            raw_captures: Vec::new(),
            network_file: None,
            failure: None,
        }
    }

    /// True when a network file was written.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of a completed run, also written as `sweep_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Run start
    pub started_at: DateTime<Utc>,
    /// End of safe shutdown
    pub finished_at: DateTime<Utc>,
    /// One entry per bias point, in grid order
    pub points: Vec<PointOutcome>,
    /// Errors raised while returning the supplies to a safe state
    pub shutdown_errors: Vec<String>,
}

impl SweepReport {
    /// Points that produced a network file.
    pub fn succeeded_points(&self) -> impl Iterator<Item = &PointOutcome> {
        self.points.iter().filter(|p| p.succeeded())
    }

    /// Points that failed, in grid order.
    pub fn failed_points(&self) -> impl Iterator<Item = &PointOutcome> {
        self.points.iter().filter(|p| !p.succeeded())
    }

    /// True when every point succeeded and shutdown was clean.
    pub fn is_clean(&self) -> bool {
        self.failed_points().next().is_none() && self.shutdown_errors.is_empty()
    }
}

/// Drives one complete bias sweep.
pub struct SweepOrchestrator {
    settings: Settings,
    timing: TimingConfig,
    grid: BiasGrid,
    frequency: FrequencyGrid,
    vna: VnaController,
    supplies: [PowerSupply; 2],
    state: SweepState,
}

impl SweepOrchestrator {
    /// Validate `settings` and take ownership of the instrument sessions.
    ///
    /// No command is sent here.
    ///
    /// # Errors
    /// [`SweepError::Configuration`] for invalid settings.
    pub fn new(settings: Settings, sessions: InstrumentSessions) -> AppResult<Self> {
        settings.validate()?;
        let grid = settings.sweep.bias_grid()?;
        let frequency = FrequencyGrid::linear_ghz(
            settings.sweep.start_ghz,
            settings.sweep.stop_ghz,
            settings.sweep.points as usize,
        );
        let timing = settings.timing;

        Ok(Self {
            vna: VnaController::new(sessions.vna, timing.acquisition),
            supplies: [
                PowerSupply::new("supply 1", sessions.supply1),
                PowerSupply::new("supply 2", sessions.supply2),
            ],
            settings,
            timing,
            grid,
            frequency,
            state: SweepState::Initializing,
        })
    }

    /// Current state.
    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Bias grid the run visits.
    pub fn grid(&self) -> &BiasGrid {
        &self.grid
    }

    fn transition(&mut self, next: SweepState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the whole sweep and return its report.
    ///
    /// # Errors
    /// Fails if the output directory cannot be prepared or the VNA cannot be
    /// configured. Per-point failures are reported in the [`SweepReport`]
    /// instead.
    pub async fn run(&mut self) -> AppResult<SweepReport> {
        self.transition(SweepState::Initializing);
        let started_at = Utc::now();
        let mut recorder = DataRecorder::create(&self.settings.storage.output_dir)?;
        self.settings
            .snapshot_to(&recorder.root().join(CONFIG_SNAPSHOT_FILE))?;

        info!(
            "Starting sweep: {} bias points, VNA {}, supplies {} / {}",
            self.grid.len(),
            self.vna.resource(),
            self.supplies[0].resource(),
            self.supplies[1].resource()
        );

        self.transition(SweepState::ConfiguringInstruments);
        if let Err(e) = self.vna.configure(&self.settings.sweep).await {
            error!("VNA configuration failed, aborting sweep: {}", e);
            self.shut_down().await;
            self.transition(SweepState::Done);
            return Err(e);
        }

        let bias_points: Vec<BiasPoint> = self.grid.iter().collect();
        let total = bias_points.len();
        let mut points = Vec::with_capacity(total);
        for (index, bias) in bias_points.into_iter().enumerate() {
            let span = info_span!("bias_point", index = index + 1, v1 = bias.v1, v2 = bias.v2);
            let outcome = self
                .measure_point(&mut recorder, index, bias)
                .instrument(span)
                .await;
            points.push(outcome);
        }

        let shutdown_errors = self.shut_down().await;

        let report = SweepReport {
            started_at,
            finished_at: Utc::now(),
            points,
            shutdown_errors,
        };
        if let Err(e) = recorder.write_summary(&report) {
            warn!("Failed to write sweep summary: {}", e);
        }

        info!(
            "Sweep finished: {}/{} bias points succeeded",
            report.succeeded_points().count(),
            total
        );
        self.transition(SweepState::Done);
        Ok(report)
    }

    async fn measure_point(
        &mut self,
        recorder: &mut DataRecorder,
        index: usize,
        bias: BiasPoint,
    ) -> PointOutcome {
        let mut outcome = PointOutcome::new(index, bias);
        match self.try_measure_point(recorder, bias, &mut outcome).await {
            Ok(()) => info!("Bias point {} {} complete", index + 1, bias),
            Err(e) => {
                warn!(
                    "Bias point {} {} failed during {:?}: {}",
                    index + 1,
                    bias,
                    self.state,
                    e
                );
                outcome.failure = Some(PointFailure {
                    stage: self.state,
                    message: e.to_string(),
                });
            }
        }
        outcome
    }

    async fn try_measure_point(
        &mut self,
        recorder: &mut DataRecorder,
        bias: BiasPoint,
        outcome: &mut PointOutcome,
    ) -> AppResult<()> {
        self.transition(SweepState::ApplyingBias);
        for (supply, volts) in self.supplies.iter_mut().zip([bias.v1, bias.v2]) {
            supply.set_voltage(volts).await?;
            supply.enable_output(true).await?;
        }

        self.transition(SweepState::Settling);
        tokio::time::sleep(self.timing.settle).await;

        self.transition(SweepState::MeasuringOperatingPoint);
        let supply1 = self.supplies[0].read_operating_point().await?;
        let supply2 = self.supplies[1].read_operating_point().await?;
        let operating_point = OperatingPoint::new(bias, supply1, supply2);
        recorder.append_operating_point(operating_point)?;
        outcome.operating_point = Some(operating_point);

        self.transition(SweepState::MeasuringSParameters);
        let mut traces = TermTraces::new();
        let mut parse_failure: Option<SweepError> = None;
        for term in ScatteringTerm::ALL {
            let capture = self.vna.capture_term(term, bias).await?;
            outcome.raw_captures.push(recorder.write_raw_capture(&capture)?);
            match capture.parse() {
                Ok(trace) => traces.insert(term, trace),
                Err(e) => {
                    warn!("{} could not be parsed, raw data kept on disk: {}", term, e);
                    if parse_failure.is_none() {
                        parse_failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = parse_failure {
            return Err(e);
        }

        self.transition(SweepState::PersistingResults);
        let set = SParameterSet::assemble(bias, self.frequency.clone(), &traces)?;
        outcome.network_file = Some(recorder.write_network(&set)?);
        Ok(())
    }

    /// Zero both supplies and switch their outputs off, supply 1 first.
    ///
    /// Every step is attempted even if an earlier one failed.
    async fn shut_down(&mut self) -> Vec<String> {
        self.transition(SweepState::ShuttingDown);
        let mut errors = Vec::new();
        for supply in self.supplies.iter_mut() {
            if let Err(e) = supply.set_voltage(0.0).await {
                error!("{}: failed to set 0 V: {}", supply.name(), e);
                errors.push(format!("{}: {}", supply.name(), e));
            }
            if let Err(e) = supply.enable_output(false).await {
                error!("{}: failed to switch output off: {}", supply.name(), e);
                errors.push(format!("{}: {}", supply.name(), e));
            }
        }
        if errors.is_empty() {
            info!("Supplies returned to 0 V with outputs off");
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoltageSequence;
    use crate::session::{MockSession, SimulatedSupply, SimulatedVna};
    use std::time::Duration;

    struct Bench {
        vna: MockSession,
        supply1: MockSession,
        supply2: MockSession,
    }

    impl Bench {
        fn new(vna: SimulatedVna) -> Self {
            Self {
                vna: MockSession::new("VNA", vna),
                supply1: MockSession::new("PSU1", SimulatedSupply::new(100.0)),
                supply2: MockSession::new("PSU2", SimulatedSupply::new(50.0)),
            }
        }

        fn sessions(&self) -> InstrumentSessions {
            InstrumentSessions {
                vna: Box::new(self.vna.clone()),
                supply1: Box::new(self.supply1.clone()),
                supply2: Box::new(self.supply2.clone()),
            }
        }
    }

    fn settings(output: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.sweep.points = 51;
        settings.sweep.bias1 = VoltageSequence::List(vec![0.0, 0.2]);
        settings.sweep.bias2 = VoltageSequence::List(vec![0.0, 0.2]);
        settings.timing.settle = Duration::from_secs(5);
        settings.timing.acquisition = Duration::from_secs(10);
        settings.storage.output_dir = output.to_path_buf();
        settings
    }

    #[test]
    fn test_invalid_settings_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        let mut settings = settings(dir.path());
        settings.sweep.points = 100;
        let result = SweepOrchestrator::new(settings, bench.sessions());
        assert!(matches!(result, Err(SweepError::Configuration(_))));
        assert!(bench.vna.commands().is_empty());
        assert!(bench.supply1.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bias_application_order() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        let mut orchestrator =
            SweepOrchestrator::new(settings(dir.path()), bench.sessions()).unwrap();
        let report = orchestrator.run().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(orchestrator.state(), SweepState::Done);
        assert_eq!(
            bench.supply1.commands(),
            vec![
                "VOLT 0", "OUTP ON", "MEAS:VOLT?", "MEAS:CURR?",
                "VOLT 0", "OUTP ON", "MEAS:VOLT?", "MEAS:CURR?",
                "VOLT 0.2", "OUTP ON", "MEAS:VOLT?", "MEAS:CURR?",
                "VOLT 0.2", "OUTP ON", "MEAS:VOLT?", "MEAS:CURR?",
                "VOLT 0", "OUTP OFF",
            ]
        );
        assert_eq!(&bench.supply2.commands()[..2], &["VOLT 0", "OUTP ON"]);
        assert_eq!(&bench.supply2.commands()[4..6], &["VOLT 0.2", "OUTP ON"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_are_taken_on_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        let mut orchestrator =
            SweepOrchestrator::new(settings(dir.path()), bench.sessions()).unwrap();
        let start = tokio::time::Instant::now();
        orchestrator.run().await.unwrap();
        // 4 points x (5 s settle + 4 x 10 s acquisition)
        assert!(start.elapsed() >= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vna_configuration_failure_is_fatal_but_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        bench.vna.fail_on("FORM4", 1);
        let mut orchestrator =
            SweepOrchestrator::new(settings(dir.path()), bench.sessions()).unwrap();

        let result = orchestrator.run().await;
        assert!(matches!(result, Err(SweepError::Communication(_))));
        assert_eq!(bench.supply1.commands(), vec!["VOLT 0", "OUTP OFF"]);
        assert_eq!(bench.supply2.commands(), vec!["VOLT 0", "OUTP OFF"]);
        assert_eq!(orchestrator.state(), SweepState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supply_failure_aborts_only_that_point() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        bench.supply2.fail_on("MEAS:CURR?", 3);
        let mut orchestrator =
            SweepOrchestrator::new(settings(dir.path()), bench.sessions()).unwrap();
        let report = orchestrator.run().await.unwrap();

        let failed: Vec<_> = report.failed_points().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 2);
        assert_eq!(
            failed[0].failure.as_ref().unwrap().stage,
            SweepState::MeasuringOperatingPoint
        );
        assert!(failed[0].operating_point.is_none());
        assert_eq!(report.succeeded_points().count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_keeps_remaining_raw_captures() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new().with_corrupt_term(ScatteringTerm::S12));
        let mut settings = settings(dir.path());
        settings.sweep.bias1 = VoltageSequence::List(vec![0.0]);
        settings.sweep.bias2 = VoltageSequence::List(vec![0.0]);
        let mut orchestrator = SweepOrchestrator::new(settings, bench.sessions()).unwrap();
        let report = orchestrator.run().await.unwrap();

        let point = &report.points[0];
        assert_eq!(point.raw_captures.len(), 4);
        assert!(point.network_file.is_none());
        let failure = point.failure.as_ref().unwrap();
        assert_eq!(failure.stage, SweepState::MeasuringSParameters);
        assert!(failure.message.contains("S12"));
        assert!(point.operating_point.is_some());
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_point_failure_is_logged_with_stage() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        bench.vna.fail_on("CHAN1; S21;", 1);
        let mut orchestrator =
            SweepOrchestrator::new(settings(dir.path()), bench.sessions()).unwrap();
        orchestrator.run().await.unwrap();

        assert!(logs_contain("failed during MeasuringSParameters"));
        assert!(logs_contain("Sweep finished: 3/4 bias points succeeded"));
        assert!(logs_contain("Supplies returned to 0 V with outputs off"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_errors_are_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let bench = Bench::new(SimulatedVna::new());
        bench.supply1.fail_on("OUTP OFF", 1);
        let mut orchestrator =
            SweepOrchestrator::new(settings(dir.path()), bench.sessions()).unwrap();
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.shutdown_errors.len(), 1);
        assert!(!report.is_clean());
        let tail: Vec<_> = bench.supply2.commands().into_iter().rev().take(2).collect();
        assert_eq!(tail, vec!["OUTP OFF", "VOLT 0"]);
    }
}
