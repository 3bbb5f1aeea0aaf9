// src/drivers/mod.rs
pub mod daqhats;
pub mod error;
pub mod sim;
pub mod source;
#[cfg(test)]
pub mod testing;

pub use daqhats::DaqHatsBackend;
pub use error::HatError;
pub use sim::{SimBackend, SimProfile};
pub use source::{
    channel_mask, DioHat, HatBackend, ScanBlock, ScanHat, ScanSetup, ThermocoupleHat,
    OPTS_DEFAULT, OPTS_EXTTRIGGER, TIMEOUT_FOREVER,
};
