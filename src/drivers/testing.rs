//! Scripted boards for unit tests.
use crate::drivers::source::{
    DioHat, HatBackend, ScanBlock, ScanHat, ScanSetup, ThermocoupleHat, OPTS_EXTTRIGGER,
    STATUS_TRIGGERED,
};
use crate::drivers::HatError;
use crate::types::BoardKind;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum FakeRead {
    /// One value per channel, repeated for every sample.
    Values(Vec<f64>),
    Fault,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub open_failures: u32,
    pub opens: u32,
    pub closes: u32,
    pub configured: u32,
    pub scan_starts: Vec<u32>,
    pub cleanups: u32,
    pub reads: VecDeque<FakeRead>,
    pub triggers: VecDeque<bool>,
    pub trigger_check_faults: u32,
    pub tc_volts: Vec<f64>,
    pub cjc: VecDeque<f64>,
    pub dio_outputs: u8,
    pub dio_stuck_inputs: Option<u8>,
    pub analog_out: Vec<f64>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_read(&self, read: FakeRead) {
        self.state.borrow_mut().reads.push_back(read);
    }

    fn try_open(&self) -> Result<(), HatError> {
        let mut state = self.state.borrow_mut();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(HatError::Simulated("open"));
        }
        state.opens += 1;
        Ok(())
    }
}

impl HatBackend for FakeBackend {
    fn open_scan(&self, _kind: BoardKind, _address: u8) -> Result<Box<dyn ScanHat>, HatError> {
        self.try_open()?;
        Ok(Box::new(FakeScan {
            state: self.state.clone(),
            channels: None,
        }))
    }

    fn open_thermocouple(&self, _address: u8) -> Result<Box<dyn ThermocoupleHat>, HatError> {
        self.try_open()?;
        Ok(Box::new(FakeThermocouple {
            state: self.state.clone(),
        }))
    }

    fn open_dio(&self, _address: u8) -> Result<Box<dyn DioHat>, HatError> {
        self.try_open()?;
        Ok(Box::new(FakeDio {
            state: self.state.clone(),
        }))
    }
}

struct FakeScan {
    state: Rc<RefCell<FakeState>>,
    channels: Option<(usize, bool)>,
}

impl ScanHat for FakeScan {
    fn serial(&mut self) -> Result<String, HatError> {
        Ok("FAKE0001".into())
    }

    fn configure(&mut self, _setup: &ScanSetup) -> Result<(), HatError> {
        self.state.borrow_mut().configured += 1;
        Ok(())
    }

    fn scan_start(&mut self, mask: u8, _samples: u32, _rate: f64, options: u32) -> Result<(), HatError> {
        self.state.borrow_mut().scan_starts.push(options);
        self.channels = Some((mask.count_ones() as usize, options & OPTS_EXTTRIGGER != 0));
        Ok(())
    }

    fn scan_read(&mut self, samples: i32, _timeout_s: f64) -> Result<ScanBlock, HatError> {
        let (channels, external) = self.channels.ok_or(HatError::NoScan)?;
        let mut state = self.state.borrow_mut();
        if samples == 0 {
            if state.trigger_check_faults > 0 {
                state.trigger_check_faults -= 1;
                return Err(HatError::Simulated("trigger check"));
            }
            let fired = external && state.triggers.pop_front().unwrap_or(false);
            return Ok(ScanBlock {
                status: if fired { STATUS_TRIGGERED } else { 0 },
                channel_count: channels,
                samples_per_channel: 0,
                data: Vec::new(),
            });
        }
        let values = match state.reads.pop_front() {
            Some(FakeRead::Fault) => return Err(HatError::Simulated("scan read")),
            Some(FakeRead::Values(values)) => values,
            None => vec![0.0; channels],
        };
        let per_channel = samples as usize;
        let mut data = Vec::with_capacity(per_channel * channels);
        for _ in 0..per_channel {
            for c in 0..channels {
                data.push(values.get(c).copied().unwrap_or(0.0));
            }
        }
        Ok(ScanBlock {
            status: 0,
            channel_count: channels,
            samples_per_channel: per_channel,
            data,
        })
    }

    fn scan_stop(&mut self) -> Result<(), HatError> {
        Ok(())
    }

    fn scan_cleanup(&mut self) -> Result<(), HatError> {
        self.channels = None;
        self.state.borrow_mut().cleanups += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }
}

struct FakeThermocouple {
    state: Rc<RefCell<FakeState>>,
}

impl ThermocoupleHat for FakeThermocouple {
    fn serial(&mut self) -> Result<String, HatError> {
        Ok("FAKE0134".into())
    }

    fn set_type_t(&mut self, _channel: u8) -> Result<(), HatError> {
        Ok(())
    }

    fn read_voltage(&mut self, channel: u8) -> Result<f64, HatError> {
        let state = self.state.borrow();
        Ok(state.tc_volts.get(channel as usize).copied().unwrap_or(0.0))
    }

    fn read_cjc(&mut self, _channel: u8) -> Result<f64, HatError> {
        let mut state = self.state.borrow_mut();
        Ok(state.cjc.pop_front().unwrap_or(25.0))
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }
}

struct FakeDio {
    state: Rc<RefCell<FakeState>>,
}

impl DioHat for FakeDio {
    fn serial(&mut self) -> Result<String, HatError> {
        Ok("FAKE0152".into())
    }

    fn dio_reset(&mut self) -> Result<(), HatError> {
        self.state.borrow_mut().dio_outputs = 0;
        Ok(())
    }

    fn dio_set_direction(&mut self, _port: u8) -> Result<(), HatError> {
        Ok(())
    }

    fn dio_write_port(&mut self, value: u8) -> Result<(), HatError> {
        self.state.borrow_mut().dio_outputs = value & 0x0F;
        Ok(())
    }

    fn dio_write_bit(&mut self, bit: u8, value: u8) -> Result<(), HatError> {
        let mut state = self.state.borrow_mut();
        if value != 0 {
            state.dio_outputs |= 1 << bit;
        } else {
            state.dio_outputs &= !(1 << bit);
        }
        Ok(())
    }

    fn dio_read_output_bit(&mut self, bit: u8) -> Result<u8, HatError> {
        Ok((self.state.borrow().dio_outputs >> bit) & 1)
    }

    fn dio_read_input_bit(&mut self, bit: u8) -> Result<u8, HatError> {
        let state = self.state.borrow();
        let port = state.dio_stuck_inputs.unwrap_or(state.dio_outputs << 4);
        Ok((port >> bit) & 1)
    }

    fn a_out_write_all(&mut self, volts: &[f64]) -> Result<(), HatError> {
        self.state.borrow_mut().analog_out = volts.to_vec();
        Ok(())
    }

    fn close(&mut self) -> Result<(), HatError> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }
}
