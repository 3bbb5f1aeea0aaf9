use crate::drivers::source::{
    DioHat, HatBackend, ScanBlock, ScanHat, ScanSetup, ThermocoupleHat, OPTS_EXTTRIGGER,
    STATUS_RUNNING, STATUS_TRIGGERED,
};
use crate::drivers::HatError;
use crate::types::BoardKind;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Knobs for the simulated boards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimProfile {
    /// Peak analog noise in volts.
    pub noise_v: f64,
    /// Probability that a scan read fails.
    pub fault_rate: f64,
    /// Probability that an armed external trigger fires.
    pub trigger_rate: f64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            noise_v: 0.5e-3,
            fault_rate: 0.0,
            trigger_rate: 0.0,
        }
    }
}

/// Backend that fabricates plausible readings so the bench runs without a HAT stack.
#[derive(Clone, Debug, Default)]
pub struct SimBackend {
    pub profile: SimProfile,
}

impl SimBackend {
    pub fn new(profile: SimProfile) -> Self {
        Self { profile }
    }
}

fn sim_serial(kind: BoardKind, address: u8) -> String {
    format!("SIM{}{:02}", &kind.tag()[3..], address)
}

impl HatBackend for SimBackend {
    fn open_scan(&self, kind: BoardKind, address: u8) -> Result<Box<dyn ScanHat>, HatError> {
        if matches!(kind, BoardKind::Mcc134 | BoardKind::Mcc152) {
            return Err(HatError::Library(format!("{kind} has no scan interface")));
        }
        debug!("simulated {kind} opened at address {address}");
        Ok(Box::new(SimScanBoard {
            serial: sim_serial(kind, address),
            profile: self.profile,
            scan: None,
            open: true,
        }))
    }

    fn open_thermocouple(&self, address: u8) -> Result<Box<dyn ThermocoupleHat>, HatError> {
        Ok(Box::new(SimThermocoupleBoard {
            serial: sim_serial(BoardKind::Mcc134, address),
            profile: self.profile,
            cjc_c: 24.0 + rand::thread_rng().gen_range(0.0..2.0),
            open: true,
        }))
    }

    fn open_dio(&self, address: u8) -> Result<Box<dyn DioHat>, HatError> {
        Ok(Box::new(SimDioBoard {
            serial: sim_serial(BoardKind::Mcc152, address),
            direction: 0xFF,
            outputs: 0,
            analog_out: [0.0; 2],
            open: true,
        }))
    }
}

#[derive(Clone, Copy, Debug)]
struct SimScan {
    channels: usize,
    external_trigger: bool,
}

struct SimScanBoard {
    serial: String,
    profile: SimProfile,
    scan: Option<SimScan>,
    open: bool,
}

impl SimScanBoard {
    fn ensure_open(&self) -> Result<(), HatError> {
        if self.open {
            Ok(())
        } else {
            Err(HatError::NotOpen)
        }
    }
}

impl ScanHat for SimScanBoard {
    fn serial(&mut self) -> Result<String, HatError> {
        self.ensure_open()?;
        Ok(self.serial.clone())
    }

    fn configure(&mut self, _setup: &ScanSetup) -> Result<(), HatError> {
        self.ensure_open()
    }

    fn scan_start(
        &mut self,
        channel_mask: u8,
        _samples_per_channel: u32,
        _rate_hz: f64,
        options: u32,
    ) -> Result<(), HatError> {
        self.ensure_open()?;
        self.scan = Some(SimScan {
            channels: channel_mask.count_ones() as usize,
            external_trigger: options & OPTS_EXTTRIGGER != 0,
        });
        Ok(())
    }

    fn scan_read(&mut self, samples_per_channel: i32, _timeout_s: f64) -> Result<ScanBlock, HatError> {
        self.ensure_open()?;
        let scan = self.scan.ok_or(HatError::NoScan)?;
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.profile.fault_rate.clamp(0.0, 1.0)) {
            return Err(HatError::Simulated("scan read"));
        }
        let mut status = STATUS_RUNNING;
        if scan.external_trigger && rng.gen_bool(self.profile.trigger_rate.clamp(0.0, 1.0)) {
            status |= STATUS_TRIGGERED;
        }
        let samples = samples_per_channel.max(0) as usize;
        let noise = self.profile.noise_v.abs();
        let data = (0..samples * scan.channels)
            .map(|_| if noise > 0.0 { rng.gen_range(-noise..=noise) } else { 0.0 })
            .collect();
        Ok(ScanBlock {
            status,
            channel_count: scan.channels,
            samples_per_channel: samples,
            data,
        })
    }

    fn scan_stop(&mut self) -> Result<(), HatError> {
        self.ensure_open()
    }

    fn scan_cleanup(&mut self) -> Result<(), HatError> {
        self.ensure_open()?;
        self.scan = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.scan = None;
        self.open = false;
        Ok(())
    }
}

struct SimThermocoupleBoard {
    serial: String,
    profile: SimProfile,
    cjc_c: f64,
    open: bool,
}

impl SimThermocoupleBoard {
    fn ensure_open(&self) -> Result<(), HatError> {
        if self.open {
            Ok(())
        } else {
            Err(HatError::NotOpen)
        }
    }
}

impl ThermocoupleHat for SimThermocoupleBoard {
    fn serial(&mut self) -> Result<String, HatError> {
        self.ensure_open()?;
        Ok(self.serial.clone())
    }

    fn set_type_t(&mut self, _channel: u8) -> Result<(), HatError> {
        self.ensure_open()
    }

    fn read_voltage(&mut self, _channel: u8) -> Result<f64, HatError> {
        self.ensure_open()?;
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.profile.fault_rate.clamp(0.0, 1.0)) {
            return Err(HatError::Simulated("thermocouple read"));
        }
        // thermocouple shorted at the terminal block: a few microvolts of noise
        Ok(rng.gen_range(-5.0e-6..=5.0e-6))
    }

    fn read_cjc(&mut self, _channel: u8) -> Result<f64, HatError> {
        self.ensure_open()?;
        Ok(self.cjc_c + rand::thread_rng().gen_range(-0.05..=0.05))
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.open = false;
        Ok(())
    }
}

/// Bits 0-3 are wired back to bits 4-7.
struct SimDioBoard {
    serial: String,
    direction: u8,
    outputs: u8,
    analog_out: [f64; 2],
    open: bool,
}

impl SimDioBoard {
    fn ensure_open(&self) -> Result<(), HatError> {
        if self.open {
            Ok(())
        } else {
            Err(HatError::NotOpen)
        }
    }
}

impl DioHat for SimDioBoard {
    fn serial(&mut self) -> Result<String, HatError> {
        Ok(self.serial.clone())
    }

    fn dio_reset(&mut self) -> Result<(), HatError> {
        self.ensure_open()?;
        self.direction = 0xFF;
        self.outputs = 0;
        Ok(())
    }

    fn dio_set_direction(&mut self, port: u8) -> Result<(), HatError> {
        self.ensure_open()?;
        self.direction = port;
        Ok(())
    }

    fn dio_write_port(&mut self, value: u8) -> Result<(), HatError> {
        self.ensure_open()?;
        self.outputs = value & !self.direction;
        Ok(())
    }

    fn dio_write_bit(&mut self, bit: u8, value: u8) -> Result<(), HatError> {
        self.ensure_open()?;
        if value != 0 {
            self.outputs |= 1 << bit;
        } else {
            self.outputs &= !(1 << bit);
        }
        Ok(())
    }

    fn dio_read_output_bit(&mut self, bit: u8) -> Result<u8, HatError> {
        self.ensure_open()?;
        Ok((self.outputs >> bit) & 1)
    }

    fn dio_read_input_bit(&mut self, bit: u8) -> Result<u8, HatError> {
        self.ensure_open()?;
        let looped = if bit >= 4 { bit - 4 } else { bit };
        Ok((self.outputs >> looped) & 1)
    }

    fn a_out_write_all(&mut self, volts: &[f64]) -> Result<(), HatError> {
        self.ensure_open()?;
        for (slot, v) in self.analog_out.iter_mut().zip(volts) {
            *slot = *v;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::source::channel_mask;

    #[test]
    fn quiet_scan_stays_inside_noise() {
        let backend = SimBackend::default();
        let mut hat = backend.open_scan(BoardKind::Mcc118, 0).unwrap();
        assert_eq!(hat.serial().unwrap(), "SIM11800");
        hat.scan_start(channel_mask(8), 100, 12_500.0, 0).unwrap();
        let block = hat.scan_read(100, -1.0).unwrap();
        assert_eq!(block.data.len(), 800);
        assert!(block.data.iter().all(|v| v.abs() <= 0.5e-3));
        assert!(!block.triggered());
    }

    #[test]
    fn read_without_scan_fails() {
        let backend = SimBackend::default();
        let mut hat = backend.open_scan(BoardKind::Mcc128, 0).unwrap();
        assert!(matches!(hat.scan_read(10, -1.0), Err(HatError::NoScan)));
    }

    #[test]
    fn armed_trigger_always_fires_at_full_rate() {
        let backend = SimBackend::new(SimProfile {
            trigger_rate: 1.0,
            ..Default::default()
        });
        let mut hat = backend.open_scan(BoardKind::Mcc172, 1).unwrap();
        hat.scan_start(0x03, 10, 51_200.0, OPTS_EXTTRIGGER).unwrap();
        assert!(hat.scan_read(0, 0.0).unwrap().triggered());
    }

    #[test]
    fn closed_thermocouple_refuses_reads() {
        let backend = SimBackend::default();
        let mut hat = backend.open_thermocouple(0).unwrap();
        hat.set_type_t(0).unwrap();
        assert!(hat.read_cjc(0).is_ok());
        hat.close().unwrap();
        assert!(matches!(hat.read_voltage(0), Err(HatError::NotOpen)));
        assert!(matches!(hat.read_cjc(0), Err(HatError::NotOpen)));
        assert!(matches!(hat.serial(), Err(HatError::NotOpen)));
    }

    #[test]
    fn dio_loops_outputs_back() {
        let backend = SimBackend::default();
        let mut hat = backend.open_dio(0).unwrap();
        hat.dio_reset().unwrap();
        hat.dio_set_direction(0xF0).unwrap();
        hat.dio_write_port(0).unwrap();
        hat.dio_write_bit(2, 1).unwrap();
        assert_eq!(hat.dio_read_output_bit(2).unwrap(), 1);
        assert_eq!(hat.dio_read_input_bit(6).unwrap(), 1);
        assert_eq!(hat.dio_read_input_bit(5).unwrap(), 0);
    }
}
