// src/boards/analog.rs
//! MCC 118 / 128 / 172: scan a block, average (or RMS) each channel, compare to a band.
use super::{BoardError, BoardTest};
use crate::config::{ScanSettings, TestConfig};
use crate::drivers::{
    channel_mask, HatBackend, HatError, ScanHat, ScanSetup, OPTS_DEFAULT, OPTS_EXTTRIGGER,
    TIMEOUT_FOREVER,
};
use crate::evaluator::outside_band;
use crate::reduce::{reduce_block, to_millivolts};
use crate::types::{BoardKind, ChannelLayout, Column, Evaluation, Reduction, ValueFormat};
use log::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Idle,
    Running,
    ArmedTrigger,
}

pub struct AnalogTest {
    kind: BoardKind,
    backend: Box<dyn HatBackend>,
    address: u8,
    scan: ScanSettings,
    limit_mv: f64,
    reduction: Reduction,
    hat: Option<Box<dyn ScanHat>>,
    state: ScanState,
}

impl AnalogTest {
    pub fn new(config: &TestConfig, backend: Box<dyn HatBackend>) -> Self {
        let reduction = match config.board {
            BoardKind::Mcc172 => Reduction::Rms,
            _ => Reduction::Mean,
        };
        Self {
            kind: config.board,
            backend,
            address: config.address,
            scan: config.scan,
            limit_mv: config.limits.voltage_mv,
            reduction,
            hat: None,
            state: ScanState::Idle,
        }
    }

    fn hat(&mut self) -> Result<&mut Box<dyn ScanHat>, HatError> {
        self.hat.as_mut().ok_or(HatError::NotOpen)
    }

    fn start(&mut self, options: u32) -> Result<(), HatError> {
        let mask = channel_mask(self.scan.channel_count);
        let (samples, rate) = (self.scan.samples_per_channel, self.scan.rate_hz);
        self.hat()?.scan_start(mask, samples, rate, options)?;
        self.state = if options & OPTS_EXTTRIGGER != 0 {
            ScanState::ArmedTrigger
        } else {
            ScanState::Running
        };
        Ok(())
    }

    fn rearm(&mut self) -> Result<(), HatError> {
        if self.has_trigger_check() {
            self.start(OPTS_EXTTRIGGER)
        } else {
            self.start(OPTS_DEFAULT)
        }
    }
}

impl BoardTest for AnalogTest {
    fn kind(&self) -> BoardKind {
        self.kind
    }

    fn layout(&self) -> ChannelLayout {
        let labels: Vec<String> = (0..self.scan.channel_count)
            .map(|c| format!("Ch {c}"))
            .collect();
        ChannelLayout {
            columns: labels
                .iter()
                .map(|l| Column::new(l.clone(), "mV", ValueFormat::Decimal(1)))
                .collect(),
            failure_labels: labels,
        }
    }

    fn open(&mut self) -> Result<String, BoardError> {
        let mut hat = self.backend.open_scan(self.kind, self.address)?;
        let serial = match hat.serial() {
            Ok(serial) => serial,
            Err(e) => {
                let _ = hat.close();
                return Err(e.into());
            }
        };
        self.hat = Some(hat);
        self.state = ScanState::Idle;
        Ok(serial)
    }

    fn configure(&mut self) -> Result<(), BoardError> {
        let setup = ScanSetup {
            channel_count: self.scan.channel_count,
            rate_hz: self.scan.rate_hz,
        };
        self.hat()?.configure(&setup)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), BoardError> {
        if self.state != ScanState::Idle {
            let hat = self.hat()?;
            hat.scan_stop()?;
            hat.scan_cleanup()?;
            self.state = ScanState::Idle;
        }
        self.start(OPTS_DEFAULT)?;
        Ok(())
    }

    fn sample(&mut self) -> Result<Evaluation, BoardError> {
        let samples = self.scan.samples_per_channel;
        let block = self.hat()?.scan_read(samples as i32, TIMEOUT_FOREVER)?;
        if block.overrun() {
            warn!("{} scan overrun (status {:#06x})", self.kind, block.status);
        }
        let volts = reduce_block(&block, samples as usize, self.reduction)?;
        let values = to_millivolts(&volts);
        let failed = values
            .iter()
            .map(|v| outside_band(*v, self.limit_mv))
            .collect();
        self.hat()?.scan_cleanup()?;
        self.state = ScanState::Idle;
        self.rearm()?;
        Ok(Evaluation {
            values,
            failed,
            details: Vec::new(),
        })
    }

    fn has_trigger_check(&self) -> bool {
        matches!(self.kind, BoardKind::Mcc128 | BoardKind::Mcc172)
    }

    fn check_trigger(&mut self) -> Result<bool, BoardError> {
        match self.state {
            ScanState::ArmedTrigger => {
                let fired = self.hat()?.scan_read(0, 0.0)?.triggered();
                self.hat()?.scan_cleanup()?;
                self.state = ScanState::Idle;
                self.start(OPTS_DEFAULT)?;
                Ok(fired)
            }
            ScanState::Running => Ok(false),
            ScanState::Idle => {
                self.start(OPTS_DEFAULT)?;
                Ok(false)
            }
        }
    }

    fn resume(&mut self) -> Result<(), BoardError> {
        self.rearm()?;
        Ok(())
    }

    fn recover(&mut self) {
        if let Some(hat) = self.hat.as_mut() {
            if let Err(e) = hat.scan_stop().and_then(|_| hat.scan_cleanup()) {
                debug!("scan cleanup after fault: {e}");
            }
        }
        self.state = ScanState::Idle;
        if self.hat.is_some() {
            if let Err(e) = self.start(OPTS_DEFAULT) {
                warn!("could not restart {} scan: {e}", self.kind);
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut hat) = self.hat.take() {
            if let Err(e) = hat.close() {
                warn!("{} close: {e}", self.kind);
            }
        }
        self.state = ScanState::Idle;
    }

    fn clear_baseline(&mut self) {}
}
