// src/boards/mod.rs
pub mod analog;
pub mod dio;
pub mod thermocouple;

use crate::config::TestConfig;
use crate::dmm::DmmError;
use crate::drivers::{HatBackend, HatError};
use crate::types::{BoardKind, ChannelLayout, Evaluation};
use thiserror::Error;

pub use analog::AnalogTest;
pub use dio::{DioTest, MeterFactory};
pub use thermocouple::ThermocoupleTest;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Hat(#[from] HatError),
    #[error("multimeter: {0}")]
    Instrument(#[from] DmmError),
}

/// Board specific half of a CE test: what to configure, what to read and how to judge it.
pub trait BoardTest {
    fn kind(&self) -> BoardKind;
    fn layout(&self) -> ChannelLayout;
    /// Opens the board and returns its serial number.
    fn open(&mut self) -> Result<String, BoardError>;
    fn configure(&mut self) -> Result<(), BoardError>;
    /// Captures the baseline and starts the first acquisition.
    fn begin(&mut self) -> Result<(), BoardError>;
    /// Reads the finished acquisition, judges it and re-arms the next one.
    fn sample(&mut self) -> Result<Evaluation, BoardError>;
    /// Boards with an external trigger input re-arm with the trigger after each sample.
    fn has_trigger_check(&self) -> bool {
        false
    }
    /// Returns whether the armed trigger fired, then restarts a normal scan.
    fn check_trigger(&mut self) -> Result<bool, BoardError> {
        Ok(false)
    }
    /// Restarts acquisition on a reopened board, keeping the baseline.
    fn resume(&mut self) -> Result<(), BoardError>;
    /// Best-effort cleanup after a failed read.
    fn recover(&mut self);
    fn close(&mut self);
    fn clear_baseline(&mut self);
}

/// Builds the test for the configured board.
pub fn build(
    config: &TestConfig,
    backend: Box<dyn HatBackend>,
    meter: MeterFactory,
) -> Box<dyn BoardTest> {
    match config.board {
        BoardKind::Mcc118 | BoardKind::Mcc128 | BoardKind::Mcc172 => {
            Box::new(AnalogTest::new(config, backend))
        }
        BoardKind::Mcc134 => Box::new(ThermocoupleTest::new(config, backend)),
        BoardKind::Mcc152 => Box::new(DioTest::new(config, backend, meter)),
    }
}
