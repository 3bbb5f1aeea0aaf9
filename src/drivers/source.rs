use crate::drivers::HatError;
use crate::types::BoardKind;

/// Status bits reported by a scan read.
pub const STATUS_HW_OVERRUN: u16 = 0x0001;
pub const STATUS_BUFFER_OVERRUN: u16 = 0x0002;
pub const STATUS_TRIGGERED: u16 = 0x0004;
pub const STATUS_RUNNING: u16 = 0x0008;

/// Scan option flags passed through to the driver.
pub const OPTS_DEFAULT: u32 = 0;
pub const OPTS_EXTTRIGGER: u32 = 1 << 3;

/// Read everything requested, waiting as long as needed.
pub const TIMEOUT_FOREVER: f64 = -1.0;

/// Block of interleaved samples returned by a scan read.
#[derive(Clone, Debug, Default)]
pub struct ScanBlock {
    pub status: u16,
    pub channel_count: usize,
    pub samples_per_channel: usize,
    pub data: Vec<f64>, // samples x channels, interleaved
}

impl ScanBlock {
    pub fn triggered(&self) -> bool {
        self.status & STATUS_TRIGGERED != 0
    }

    pub fn overrun(&self) -> bool {
        self.status & (STATUS_HW_OVERRUN | STATUS_BUFFER_OVERRUN) != 0
    }
}

/// Acquisition parameters applied before the first scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanSetup {
    pub channel_count: usize,
    pub rate_hz: f64,
}

/// Mask with the lowest `channel_count` bits set.
pub fn channel_mask(channel_count: usize) -> u8 {
    if channel_count >= 8 {
        0xFF
    } else {
        ((1u16 << channel_count) - 1) as u8
    }
}

/// Scanning analog input boards (MCC 118 / 128 / 172).
pub trait ScanHat {
    fn serial(&mut self) -> Result<String, HatError>;
    /// Applies input mode, range, clock and trigger settings for the board.
    fn configure(&mut self, setup: &ScanSetup) -> Result<(), HatError>;
    fn scan_start(
        &mut self,
        channel_mask: u8,
        samples_per_channel: u32,
        rate_hz: f64,
        options: u32,
    ) -> Result<(), HatError>;
    /// `samples_per_channel == 0` returns status only.
    fn scan_read(&mut self, samples_per_channel: i32, timeout_s: f64) -> Result<ScanBlock, HatError>;
    fn scan_stop(&mut self) -> Result<(), HatError>;
    fn scan_cleanup(&mut self) -> Result<(), HatError>;
    fn close(&mut self) -> Result<(), HatError>;
}

/// Thermocouple input board (MCC 134).
pub trait ThermocoupleHat {
    fn serial(&mut self) -> Result<String, HatError>;
    fn set_type_t(&mut self, channel: u8) -> Result<(), HatError>;
    /// Raw thermocouple voltage in volts.
    fn read_voltage(&mut self, channel: u8) -> Result<f64, HatError>;
    /// Cold junction temperature in degrees C.
    fn read_cjc(&mut self, channel: u8) -> Result<f64, HatError>;
    fn close(&mut self) -> Result<(), HatError>;
}

/// DIO + analog output board (MCC 152).
pub trait DioHat {
    fn serial(&mut self) -> Result<String, HatError>;
    fn dio_reset(&mut self) -> Result<(), HatError>;
    /// Direction bits: 1 = input, 0 = output.
    fn dio_set_direction(&mut self, port: u8) -> Result<(), HatError>;
    fn dio_write_port(&mut self, value: u8) -> Result<(), HatError>;
    fn dio_write_bit(&mut self, bit: u8, value: u8) -> Result<(), HatError>;
    fn dio_read_output_bit(&mut self, bit: u8) -> Result<u8, HatError>;
    fn dio_read_input_bit(&mut self, bit: u8) -> Result<u8, HatError>;
    fn a_out_write_all(&mut self, volts: &[f64]) -> Result<(), HatError>;
    fn close(&mut self) -> Result<(), HatError>;
}

/// Something that can open boards by address.
pub trait HatBackend {
    fn open_scan(&self, kind: BoardKind, address: u8) -> Result<Box<dyn ScanHat>, HatError>;
    fn open_thermocouple(&self, address: u8) -> Result<Box<dyn ThermocoupleHat>, HatError>;
    fn open_dio(&self, address: u8) -> Result<Box<dyn DioHat>, HatError>;
}
