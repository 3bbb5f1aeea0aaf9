// src/session.rs
use crate::boards::{BoardError, BoardTest};
use crate::types::{BoardKind, ChannelLayout, Evaluation};
use log::{debug, info};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
    Configured,
    Scanning,
}

/// Why a cycle step could not talk to the board.
#[derive(Debug, Error)]
pub enum AcquisitionFault {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(BoardError),
    #[error("configuration failed: {0}")]
    Configure(BoardError),
    #[error("baseline capture failed: {0}")]
    Baseline(BoardError),
    #[error("acquisition failed: {0}")]
    Read(BoardError),
    #[error("trigger check failed: {0}")]
    Trigger(BoardError),
}

impl AcquisitionFault {
    /// Open and configure failures are retried without feeding the watchdog.
    pub fn counts_for_watchdog(&self) -> bool {
        !matches!(
            self,
            AcquisitionFault::DeviceUnavailable(_) | AcquisitionFault::Configure(_)
        )
    }
}

/// Lifecycle of one board handle: closed → open → configured → scanning → closed.
pub struct DeviceSession {
    board: Box<dyn BoardTest>,
    state: SessionState,
    serial: Option<String>,
}

impl DeviceSession {
    pub fn new(board: Box<dyn BoardTest>) -> Self {
        Self {
            board,
            state: SessionState::Closed,
            serial: None,
        }
    }

    pub fn kind(&self) -> BoardKind {
        self.board.kind()
    }

    pub fn layout(&self) -> ChannelLayout {
        self.board.layout()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn has_trigger_check(&self) -> bool {
        self.board.has_trigger_check()
    }

    /// Opens and configures the board. A no-op when already open.
    pub fn open(&mut self) -> Result<(), AcquisitionFault> {
        if self.is_open() {
            return Ok(());
        }
        let serial = self.board.open().map_err(AcquisitionFault::DeviceUnavailable)?;
        self.state = SessionState::Open;
        if let Err(e) = self.board.configure() {
            self.board.close();
            self.state = SessionState::Closed;
            return Err(AcquisitionFault::Configure(e));
        }
        info!("{} {serial} ready", self.board.kind());
        self.serial = Some(serial);
        self.state = SessionState::Configured;
        Ok(())
    }

    pub fn start_baseline(&mut self) -> Result<(), AcquisitionFault> {
        self.board.begin().map_err(AcquisitionFault::Baseline)?;
        self.state = SessionState::Scanning;
        Ok(())
    }

    /// Restarts acquisition after a reopen; the baseline is kept.
    pub fn resume(&mut self) -> Result<(), AcquisitionFault> {
        self.board.resume().map_err(AcquisitionFault::Read)?;
        self.state = SessionState::Scanning;
        Ok(())
    }

    pub fn sample(&mut self) -> Result<Evaluation, AcquisitionFault> {
        self.board.sample().map_err(|e| {
            self.board.recover();
            AcquisitionFault::Read(e)
        })
    }

    pub fn check_trigger(&mut self) -> Result<bool, AcquisitionFault> {
        self.board.check_trigger().map_err(|e| {
            self.board.recover();
            AcquisitionFault::Trigger(e)
        })
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.board.close();
        self.state = SessionState::Closed;
        debug!("{} session closed", self.board.kind());
    }

    pub fn clear_baseline(&mut self) {
        self.board.clear_baseline();
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
