// src/cycle.rs
//! Baseline / sample / trigger-check steps of a CE test run.
use crate::config::{TestConfig, Timing};
use crate::evaluator::Tally;
use crate::recorder::{CsvLogger, RecorderError};
use crate::session::{AcquisitionFault, DeviceSession};
use crate::types::{BoardKind, ChannelLayout, Evaluation, Phase, RowStatus};
use crate::watchdog::Watchdog;
use chrono::Local;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Baseline,
    Sample,
    CheckTrigger,
}

/// What a step asks of whoever drives the cycle.
#[derive(Debug, Default, PartialEq)]
pub struct StepOutcome {
    pub next: Option<(Step, Duration)>,
    /// The board was touched: blink the activity LED.
    pub activity: bool,
    /// Display cycle closed with this instantaneous verdict.
    pub verdict: Option<bool>,
    /// Modal error; the run stops.
    pub alert: Option<String>,
    /// Lines for the on-screen message log.
    pub messages: Vec<String>,
}

impl StepOutcome {
    fn then(step: Step, delay_ms: u64) -> Self {
        Self {
            next: Some((step, Timing::ms(delay_ms))),
            ..Default::default()
        }
    }

    fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

pub struct SamplingCycle {
    session: DeviceSession,
    layout: ChannelLayout,
    timing: Timing,
    data_dir: PathBuf,
    phase: Phase,
    tally: Tally,
    watchdog: Watchdog,
    logger: Option<CsvLogger>,
    latest: Evaluation,
    last_trigger_error: bool,
}

impl SamplingCycle {
    pub fn new(config: &TestConfig, session: DeviceSession) -> Self {
        let layout = session.layout();
        Self {
            tally: Tally::new(layout.failure_labels.len()),
            latest: Evaluation {
                values: vec![0.0; layout.columns.len()],
                failed: vec![false; layout.failure_labels.len()],
                details: Vec::new(),
            },
            layout,
            timing: config.timing,
            data_dir: config.data_dir.clone(),
            phase: Phase::Idle,
            watchdog: Watchdog::new(config.watchdog),
            logger: None,
            last_trigger_error: false,
            session,
        }
    }

    pub fn kind(&self) -> BoardKind {
        self.session.kind()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn latest(&self) -> &Evaluation {
        &self.latest
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn set_watchdog(&mut self, enabled: bool) {
        self.watchdog.set_enabled(enabled);
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.logger.as_ref().map(|l| l.path().to_path_buf())
    }

    /// Marks the run as started; the first step is `Baseline`.
    pub fn arm(&mut self) {
        self.phase = Phase::AwaitingDevice;
    }

    pub fn run(&mut self, step: Step) -> StepOutcome {
        match step {
            Step::Baseline => self.baseline(),
            Step::Sample => self.sample(),
            Step::CheckTrigger => self.check_trigger(),
        }
    }

    /// Ends the run: closes the log and the device.
    pub fn stop(&mut self) {
        if let Some(logger) = self.logger.take() {
            info!("closed {} after {} rows", logger.path().display(), logger.rows());
        }
        self.session.close();
        self.phase = Phase::Idle;
    }

    /// Clears counters and baseline; the next run starts from scratch.
    pub fn reset(&mut self) {
        self.stop();
        self.session.clear_baseline();
        self.tally.reset();
        self.watchdog.reset();
        self.last_trigger_error = false;
        self.latest.values.iter_mut().for_each(|v| *v = 0.0);
        self.latest.failed.iter_mut().for_each(|f| *f = false);
        self.latest.details.clear();
    }

    fn open_failed(&mut self, fault: AcquisitionFault, out: &mut StepOutcome) {
        warn!("{fault}");
        out.note(format!("open failed: {fault}"));
        self.tally.software_error();
    }

    /// Counts a fault; returns `true` when the watchdog closed the session.
    fn acquisition_failed(&mut self, fault: AcquisitionFault, out: &mut StepOutcome) -> bool {
        warn!("{fault}");
        out.note(fault.to_string());
        self.tally.software_error();
        if fault.counts_for_watchdog() && self.watchdog.fault() {
            warn!("watchdog tripped, reopening {}", self.kind());
            out.note("watchdog: reopening device");
            self.session.close();
            self.phase = Phase::AwaitingDevice;
            return true;
        }
        false
    }

    fn record_failed(&mut self, e: RecorderError, out: &mut StepOutcome) {
        error!("{e}");
        out.alert = Some(format!("Cannot write CSV file: {e}"));
        out.next = None;
        self.logger = None;
        self.phase = Phase::Idle;
    }

    fn baseline(&mut self) -> StepOutcome {
        if !self.session.is_open() {
            self.phase = Phase::AwaitingDevice;
            let mut out = StepOutcome::then(Step::Baseline, self.timing.open_retry_ms);
            match self.session.open() {
                Ok(()) => {
                    self.phase = Phase::BaselineCapture;
                    out.note(format!(
                        "{} {} opened",
                        self.kind(),
                        self.session.serial().unwrap_or("?")
                    ));
                }
                Err(fault) => self.open_failed(fault, &mut out),
            }
            return out;
        }

        self.phase = Phase::BaselineCapture;
        // open retries are counted but do not fail the first cycle
        self.tally.discard_pending();
        let mut out = StepOutcome {
            activity: true,
            ..Default::default()
        };
        match self.session.start_baseline() {
            Ok(()) => {
                self.watchdog.success();
                let header = self.layout.header();
                match CsvLogger::create(&self.data_dir, self.kind(), &header, Local::now()) {
                    Ok(logger) => {
                        out.note(format!("logging to {}", logger.path().display()));
                        self.logger = Some(logger);
                        self.phase = Phase::Sampling;
                        out.next = Some((Step::Sample, Timing::ms(self.timing.baseline_to_sample_ms)));
                    }
                    Err(e) => {
                        error!("{e}");
                        out.alert = Some(format!("Cannot create CSV file: {e}"));
                        self.phase = Phase::Idle;
                        return out;
                    }
                }
            }
            Err(fault) => {
                let delay_ms = if self.acquisition_failed(fault, &mut out) {
                    self.timing.watchdog_reopen_ms
                } else {
                    self.timing.baseline_retry_ms
                };
                out.next = Some((Step::Baseline, Timing::ms(delay_ms)));
            }
        }
        out.verdict = Some(self.tally.settle());
        out
    }

    /// Reopens after a watchdog trip and restarts acquisition on the kept baseline.
    fn reopen(&mut self) -> StepOutcome {
        let mut out = StepOutcome::then(Step::Sample, self.timing.open_retry_ms);
        if let Err(fault) = self.session.open() {
            self.open_failed(fault, &mut out);
            return out;
        }
        out.note(format!("{} reopened", self.kind()));
        if let Err(fault) = self.session.resume() {
            self.acquisition_failed(fault, &mut out);
            return out;
        }
        self.phase = Phase::Sampling;
        if self.session.has_trigger_check() {
            out.next = Some((Step::CheckTrigger, Timing::ms(self.timing.trigger_check_ms)));
        }
        out
    }

    fn sample(&mut self) -> StepOutcome {
        if !self.session.is_open() {
            return self.reopen();
        }

        let mut out = StepOutcome {
            activity: true,
            ..Default::default()
        };
        let now = Local::now();
        let mut tripped = false;
        let written = match self.session.sample() {
            Ok(evaluation) => {
                if evaluation.any_failed() {
                    debug!("{} out of limits: {:?}", self.kind(), evaluation.failed);
                }
                self.watchdog.success();
                self.tally.record_columns(&evaluation.failed);
                let status = if self.last_trigger_error {
                    RowStatus::TriggerError
                } else {
                    RowStatus::Ok
                };
                self.last_trigger_error = false;
                let rendered = self.layout.render(&evaluation.values);
                self.latest = evaluation;
                self.logger
                    .as_mut()
                    .map(|l| l.write_values(now, &rendered, status))
            }
            Err(fault) => {
                tripped = self.acquisition_failed(fault, &mut out);
                self.logger
                    .as_mut()
                    .map(|l| l.write_error(now, RowStatus::SoftwareError))
            }
        };
        self.tally.test_done();
        out.verdict = Some(self.tally.settle());

        if let Some(Err(e)) = written {
            self.record_failed(e, &mut out);
            return out;
        }

        out.next = Some(if tripped {
            (Step::Sample, Timing::ms(self.timing.watchdog_reopen_ms))
        } else if self.session.has_trigger_check() {
            (Step::CheckTrigger, Timing::ms(self.timing.trigger_check_ms))
        } else {
            (Step::Sample, Timing::ms(self.timing.sample_period_ms))
        });
        out
    }

    fn check_trigger(&mut self) -> StepOutcome {
        if !self.session.is_open() {
            return self.reopen();
        }
        let mut out = StepOutcome::then(Step::Sample, self.timing.trigger_check_ms);
        match self.session.check_trigger() {
            Ok(true) => {
                warn!("{} trigger fired during test", self.kind());
                out.note("trigger error");
                self.tally.trigger_error();
                self.last_trigger_error = true;
            }
            Ok(false) => {}
            Err(fault) => {
                if self.acquisition_failed(fault, &mut out) {
                    out.next = Some((Step::Sample, Timing::ms(self.timing.watchdog_reopen_ms)));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::{self, MeterFactory};
    use crate::dmm::{DmmError, Multimeter, SimMultimeter};
    use crate::drivers::testing::{FakeBackend, FakeRead};
    use std::fs;

    fn no_meter() -> MeterFactory {
        Box::new(|| -> Result<Box<dyn Multimeter>, DmmError> { Err(DmmError::Closed) })
    }

    fn cycle(kind: BoardKind, fake: &FakeBackend, dir: &std::path::Path, watchdog: bool) -> SamplingCycle {
        let mut config = TestConfig::for_board(kind);
        config.data_dir = dir.to_path_buf();
        config.watchdog = watchdog;
        config.scan.samples_per_channel = 2;
        let board = boards::build(&config, Box::new(fake.clone()), no_meter());
        let mut cycle = SamplingCycle::new(&config, DeviceSession::new(board));
        cycle.arm();
        cycle
    }

    /// Opens the device and captures the baseline.
    fn start(cycle: &mut SamplingCycle) {
        assert_eq!(cycle.run(Step::Baseline).next, Some((Step::Baseline, Timing::ms(500))));
        let out = cycle.run(Step::Baseline);
        assert_eq!(out.next.map(|n| n.0), Some(Step::Sample));
        assert_eq!(cycle.phase(), Phase::Sampling);
    }

    fn csv_lines(cycle: &SamplingCycle) -> Vec<String> {
        let path = cycle.log_path().unwrap();
        fs::read_to_string(path).unwrap().lines().map(str::to_owned).collect()
    }

    #[test]
    fn open_retries_without_watchdog() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        fake.state.borrow_mut().open_failures = 7;
        let mut c = cycle(BoardKind::Mcc118, &fake, dir.path(), true);
        for _ in 0..7 {
            let out = c.run(Step::Baseline);
            assert_eq!(out.next, Some((Step::Baseline, Timing::ms(500))));
            assert_eq!(c.phase(), Phase::AwaitingDevice);
        }
        assert_eq!(c.tally().software_errors, 7);
        assert_eq!(c.watchdog().count(), 0);
        start(&mut c);
    }

    #[test]
    fn open_retries_do_not_latch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        fake.state.borrow_mut().open_failures = 2;
        let mut c = cycle(BoardKind::Mcc118, &fake, dir.path(), false);
        c.run(Step::Baseline);
        c.run(Step::Baseline);
        start(&mut c);
        assert_eq!(c.tally().software_errors, 2);
        assert!(!c.tally().latched());
        fake.push_read(FakeRead::Values(vec![0.010; 8]));
        assert_eq!(c.run(Step::Sample).verdict, Some(false));
        assert!(!c.tally().latched());
    }

    #[test]
    fn dio_row_keeps_bits_and_meter_reading() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut config = TestConfig::for_board(BoardKind::Mcc152);
        config.data_dir = dir.path().to_path_buf();
        let meter: MeterFactory =
            Box::new(|| Ok(Box::new(SimMultimeter::new(4.99871, 0.0)) as Box<dyn Multimeter>));
        let board = boards::build(&config, Box::new(fake.clone()), meter);
        let mut c = SamplingCycle::new(&config, DeviceSession::new(board));
        c.arm();
        start(&mut c);
        assert_eq!(c.run(Step::Sample).verdict, Some(false));

        let lines = csv_lines(&c);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",AO 0,Status"));
        assert!(lines[1].ends_with(",0,0,0,0,0,0,0,0,4.998710,"), "{}", lines[1]);
    }

    #[test]
    fn thermocouple_row_uses_one_decimal() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        fake.state.borrow_mut().tc_volts = vec![1.5e-6, -3.0e-6, 0.0, 2.0e-6];
        let mut c = cycle(BoardKind::Mcc134, &fake, dir.path(), false);
        start(&mut c);
        assert_eq!(c.run(Step::Sample).verdict, Some(false));

        let lines = csv_lines(&c);
        assert!(lines[0].ends_with(",TC 3,CJC 0,CJC 1,CJC 2,CJC 3,Status"));
        assert!(lines[1].ends_with(",1.5,-3.0,0.0,2.0,25.0,25.0,25.0,25.0,"), "{}", lines[1]);
    }

    #[test]
    fn csv_gets_one_row_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut c = cycle(BoardKind::Mcc118, &fake, dir.path(), false);
        start(&mut c);
        fake.push_read(FakeRead::Values(vec![0.010; 8]));
        fake.push_read(FakeRead::Fault);
        fake.push_read(FakeRead::Values(vec![0.030; 8]));
        let verdicts: Vec<Option<bool>> = (0..3).map(|_| c.run(Step::Sample).verdict).collect();
        assert_eq!(verdicts, vec![Some(false), Some(true), Some(true)]);

        let lines = csv_lines(&c);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Time,Ch 0,"));
        assert!(lines[1].ends_with(",10.0,"));
        assert!(lines[2].ends_with(",,,,,,,,,Software error"));
        assert_eq!(lines[2].split(',').count(), 10);
        assert_eq!(c.tally().failures, vec![1; 8]);
        assert_eq!(c.tally().test_count, 3);
        assert_eq!(c.tally().software_errors, 1);
        assert!(c.tally().latched());
    }

    #[test]
    fn watchdog_trips_once_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut c = cycle(BoardKind::Mcc118, &fake, dir.path(), true);
        start(&mut c);
        for _ in 0..5 {
            fake.push_read(FakeRead::Fault);
        }
        for i in 0..5 {
            let out = c.run(Step::Sample);
            if i < 4 {
                assert_eq!(out.next, Some((Step::Sample, Timing::ms(1000))));
            } else {
                assert_eq!(out.next, Some((Step::Sample, Timing::ms(500))));
            }
        }
        assert!(!c.session().is_open());
        assert_eq!(c.phase(), Phase::AwaitingDevice);
        assert_eq!(fake.state.borrow().closes, 1);

        // reopen restarts the scan, then sampling resumes
        let out = c.run(Step::Sample);
        assert_eq!(out.next, Some((Step::Sample, Timing::ms(500))));
        assert_eq!(fake.state.borrow().opens, 2);
        assert!(c.run(Step::Sample).verdict == Some(false));
        assert_eq!(csv_lines(&c).len(), 7);
        assert_eq!(c.tally().software_errors, 5);
    }

    #[test]
    fn trigger_error_marks_next_row() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut c = cycle(BoardKind::Mcc128, &fake, dir.path(), false);
        start(&mut c);
        let out = c.run(Step::Sample);
        assert_eq!(out.next, Some((Step::CheckTrigger, Timing::ms(500))));
        fake.state.borrow_mut().triggers.push_back(true);
        let out = c.run(Step::CheckTrigger);
        assert_eq!(out.next, Some((Step::Sample, Timing::ms(500))));
        assert_eq!(out.verdict, None);
        assert_eq!(c.run(Step::Sample).verdict, Some(true));
        c.run(Step::CheckTrigger);
        c.run(Step::Sample);

        let lines = csv_lines(&c);
        assert!(lines[1].ends_with(','));
        assert!(lines[2].ends_with(",Trigger error"));
        assert!(lines[3].ends_with(','));
        assert_eq!(c.tally().trigger_errors, 1);
    }

    #[test]
    fn trigger_check_fault_is_software_error() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut c = cycle(BoardKind::Mcc172, &fake, dir.path(), false);
        start(&mut c);
        c.run(Step::Sample);
        fake.state.borrow_mut().trigger_check_faults = 1;
        let out = c.run(Step::CheckTrigger);
        assert_eq!(out.next, Some((Step::Sample, Timing::ms(500))));
        assert_eq!(c.tally().software_errors, 1);
        assert!(c.run(Step::Sample).verdict == Some(true));
    }

    #[test]
    fn csv_failure_halts_with_alert() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let fake = FakeBackend::new();
        let mut c = cycle(BoardKind::Mcc134, &fake, &blocker, false);
        c.run(Step::Baseline);
        let out = c.run(Step::Baseline);
        assert!(out.alert.unwrap().starts_with("Cannot create CSV file"));
        assert_eq!(out.next, None);
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[test]
    fn reset_clears_counters_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeBackend::new();
        let mut c = cycle(BoardKind::Mcc118, &fake, dir.path(), false);
        start(&mut c);
        fake.push_read(FakeRead::Values(vec![1.0; 8]));
        c.run(Step::Sample);
        assert!(c.tally().latched());
        c.reset();
        assert_eq!(c.tally(), &Tally::new(8));
        assert!(c.log_path().is_none());
        assert!(!c.session().is_open());
        assert_eq!(c.phase(), Phase::Idle);
        assert!(c.latest().values.iter().all(|v| *v == 0.0));
    }
}
