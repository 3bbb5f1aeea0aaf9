// src/boards/dio.rs
use super::{BoardError, BoardTest};
use crate::config::TestConfig;
use crate::dmm::{DmmError, Measurement, Multimeter};
use crate::drivers::{DioHat, HatBackend, HatError};
use crate::evaluator::{ao_error_mv, loopback_mismatch};
use crate::types::{BoardKind, ChannelLayout, Column, Evaluation, ValueFormat};
use log::{info, warn};
use rand::Rng;

/// Outputs on bits 0-3, inputs on bits 4-7.
const DIRECTION_PORT: u8 = 0xF0;
const LOOP_BITS: u8 = 4;

pub type MeterFactory = Box<dyn FnMut() -> Result<Box<dyn Multimeter>, DmmError>>;

/// MCC 152 with bits 0-3 wired to bits 4-7 and both analog outputs
/// held at full scale, checked by an external meter on AO 0.
pub struct DioTest {
    backend: Box<dyn HatBackend>,
    address: u8,
    ao_voltage: f64,
    limit_mv: f64,
    measurement: Measurement,
    hat: Option<Box<dyn DioHat>>,
    connect_meter: MeterFactory,
    meter: Option<Box<dyn Multimeter>>,
}

impl DioTest {
    pub fn new(config: &TestConfig, backend: Box<dyn HatBackend>, connect_meter: MeterFactory) -> Self {
        Self {
            backend,
            address: config.address,
            ao_voltage: config.ao_voltage,
            limit_mv: config.limits.voltage_mv,
            measurement: config.dmm.measurement,
            hat: None,
            connect_meter,
            meter: None,
        }
    }

    fn hat(&mut self) -> Result<&mut Box<dyn DioHat>, HatError> {
        self.hat.as_mut().ok_or(HatError::NotOpen)
    }
}

impl BoardTest for DioTest {
    fn kind(&self) -> BoardKind {
        BoardKind::Mcc152
    }

    fn layout(&self) -> ChannelLayout {
        let mut columns: Vec<Column> = (0..LOOP_BITS)
            .map(|b| Column::new(format!("DOut {b}"), "", ValueFormat::Bit))
            .collect();
        columns.extend(
            (LOOP_BITS..2 * LOOP_BITS).map(|b| Column::new(format!("DIn {b}"), "", ValueFormat::Bit)),
        );
        columns.push(Column::new("AO 0", "V", ValueFormat::Decimal(6)));
        let mut failure_labels: Vec<String> = (0..LOOP_BITS).map(|b| format!("DIO {b}")).collect();
        failure_labels.push("AO 0".into());
        ChannelLayout {
            columns,
            failure_labels,
        }
    }

    fn open(&mut self) -> Result<String, BoardError> {
        if self.meter.is_none() {
            self.meter = Some((self.connect_meter)()?);
            info!("multimeter connected");
        }
        let mut hat = self.backend.open_dio(self.address)?;
        match hat.serial() {
            Ok(serial) => {
                self.hat = Some(hat);
                Ok(serial)
            }
            Err(e) => {
                let _ = hat.close();
                Err(e.into())
            }
        }
    }

    fn configure(&mut self) -> Result<(), BoardError> {
        let ao = self.ao_voltage;
        let hat = self.hat()?;
        hat.dio_reset()?;
        hat.dio_set_direction(DIRECTION_PORT)?;
        hat.dio_write_port(0x00)?;
        hat.a_out_write_all(&[ao, ao])?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), BoardError> {
        if let Some(meter) = self.meter.as_mut() {
            meter.display("MCC 152 CE")?;
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<Evaluation, BoardError> {
        let (ao, limit_mv, measurement) = (self.ao_voltage, self.limit_mv, self.measurement);
        let hat = self.hat()?;
        let mut rng = rand::thread_rng();
        let mut outputs = Vec::with_capacity(LOOP_BITS as usize);
        let mut inputs = Vec::with_capacity(LOOP_BITS as usize);
        let mut failed = Vec::with_capacity(LOOP_BITS as usize + 1);
        for bit in 0..LOOP_BITS {
            let out = hat.dio_read_output_bit(bit)?;
            let input = hat.dio_read_input_bit(bit + LOOP_BITS)?;
            failed.push(loopback_mismatch(out, input));
            outputs.push(f64::from(out));
            inputs.push(f64::from(input));
            // next cycle's pattern
            hat.dio_write_bit(bit, rng.gen_range(0..=1))?;
        }

        let meter = self
            .meter
            .as_mut()
            .ok_or(BoardError::Instrument(DmmError::Closed))?;
        let measured = meter.read_voltage(measurement)?;
        let error_mv = ao_error_mv(measured, ao);
        failed.push(error_mv.abs() > limit_mv);

        let mut values = outputs;
        values.extend(inputs);
        values.push(measured);
        Ok(Evaluation {
            values,
            failed,
            details: vec![
                ("AO setpoint (V)".into(), format!("{ao:.3}")),
                ("AO error (mV)".into(), format!("{error_mv:.3}")),
            ],
        })
    }

    fn resume(&mut self) -> Result<(), BoardError> {
        Ok(())
    }

    fn recover(&mut self) {}

    fn close(&mut self) {
        if let Some(mut hat) = self.hat.take() {
            if let Err(e) = hat.close() {
                warn!("MCC 152 close: {e}");
            }
        }
    }

    fn clear_baseline(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmm::SimMultimeter;
    use crate::drivers::testing::FakeBackend;

    fn dio_test(fake: &FakeBackend, meter_level: f64) -> DioTest {
        let config = TestConfig::for_board(BoardKind::Mcc152);
        let factory: MeterFactory =
            Box::new(move || Ok(Box::new(SimMultimeter::new(meter_level, 0.0)) as Box<dyn Multimeter>));
        let mut test = DioTest::new(&config, Box::new(fake.clone()), factory);
        assert_eq!(test.open().unwrap(), "FAKE0152");
        test.configure().unwrap();
        test.begin().unwrap();
        test
    }

    #[test]
    fn configure_drives_both_outputs_full_scale() {
        let fake = FakeBackend::new();
        let _test = dio_test(&fake, 5.0);
        assert_eq!(fake.state.borrow().analog_out, vec![5.0, 5.0]);
        assert_eq!(fake.state.borrow().dio_outputs, 0);
    }

    #[test]
    fn healthy_loopback_passes() {
        let fake = FakeBackend::new();
        let mut test = dio_test(&fake, 4.99);
        for _ in 0..5 {
            let eval = test.sample().unwrap();
            assert_eq!(eval.values.len(), 9);
            assert!(!eval.any_failed(), "{eval:?}");
        }
    }

    #[test]
    fn stuck_input_and_ao_error_fail() {
        let fake = FakeBackend::new();
        let mut test = dio_test(&fake, 4.90);
        fake.state.borrow_mut().dio_outputs = 0b0101;
        fake.state.borrow_mut().dio_stuck_inputs = Some(0x00);
        let eval = test.sample().unwrap();
        assert_eq!(eval.failed, vec![true, false, true, false, true]);
        assert_eq!(test.layout().header().len(), 11);
    }

    #[test]
    fn missing_meter_blocks_open() {
        let fake = FakeBackend::new();
        let config = TestConfig::for_board(BoardKind::Mcc152);
        let factory: MeterFactory = Box::new(|| Err(DmmError::Closed));
        let mut test = DioTest::new(&config, Box::new(fake.clone()), factory);
        assert!(matches!(test.open(), Err(BoardError::Instrument(_))));
        assert_eq!(fake.state.borrow().opens, 0);
    }
}
