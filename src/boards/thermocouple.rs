// src/boards/thermocouple.rs
use super::{BoardError, BoardTest};
use crate::config::TestConfig;
use crate::drivers::{HatBackend, HatError, ThermocoupleHat};
use crate::evaluator::{drifted, outside_band};
use crate::types::{BoardKind, ChannelLayout, Column, Evaluation, ValueFormat};
use log::{info, warn};

const CHANNELS: u8 = 4;

/// MCC 134 with shorted type T inputs: TC voltage must stay near zero and
/// the cold junction sensors must not drift from the baseline.
pub struct ThermocoupleTest {
    backend: Box<dyn HatBackend>,
    address: u8,
    tc_limit_uv: f64,
    cjc_limit_c: f64,
    hat: Option<Box<dyn ThermocoupleHat>>,
    baseline: Option<Vec<f64>>,
}

impl ThermocoupleTest {
    pub fn new(config: &TestConfig, backend: Box<dyn HatBackend>) -> Self {
        Self {
            backend,
            address: config.address,
            tc_limit_uv: config.limits.tc_uv,
            cjc_limit_c: config.limits.cjc_c,
            hat: None,
            baseline: None,
        }
    }

    fn hat(&mut self) -> Result<&mut Box<dyn ThermocoupleHat>, HatError> {
        self.hat.as_mut().ok_or(HatError::NotOpen)
    }
}

impl BoardTest for ThermocoupleTest {
    fn kind(&self) -> BoardKind {
        BoardKind::Mcc134
    }

    fn layout(&self) -> ChannelLayout {
        let tc = (0..CHANNELS).map(|c| format!("TC {c}"));
        let cjc = (0..CHANNELS).map(|c| format!("CJC {c}"));
        let labels: Vec<String> = tc.chain(cjc).collect();
        let columns = labels
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let unit = if i < CHANNELS as usize { "µV" } else { "°C" };
                Column::new(l.clone(), unit, ValueFormat::Decimal(1))
            })
            .collect();
        ChannelLayout {
            columns,
            failure_labels: labels,
        }
    }

    fn open(&mut self) -> Result<String, BoardError> {
        let mut hat = self.backend.open_thermocouple(self.address)?;
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
        let hat = self.hat()?;
        for channel in 0..CHANNELS {
            hat.set_type_t(channel)?;
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), BoardError> {
        let hat = self.hat()?;
        let mut baseline = Vec::with_capacity(CHANNELS as usize);
        for channel in 0..CHANNELS {
            baseline.push(hat.read_cjc(channel)?);
        }
        info!("CJC baseline {baseline:.2?}");
        self.baseline = Some(baseline);
        Ok(())
    }

    fn sample(&mut self) -> Result<Evaluation, BoardError> {
        let (tc_limit, cjc_limit) = (self.tc_limit_uv, self.cjc_limit_c);
        let baseline = self.baseline.clone();
        let hat = self.hat()?;
        let mut tc_uv = Vec::with_capacity(CHANNELS as usize);
        let mut cjc_c = Vec::with_capacity(CHANNELS as usize);
        for channel in 0..CHANNELS {
            tc_uv.push(hat.read_voltage(channel)? * 1e6);
            cjc_c.push(hat.read_cjc(channel)?);
        }

        let mut failed: Vec<bool> = tc_uv.iter().map(|v| outside_band(*v, tc_limit)).collect();
        let mut details = Vec::new();
        match &baseline {
            Some(base) => {
                for (channel, (now, then)) in cjc_c.iter().zip(base).enumerate() {
                    failed.push(drifted(*now, *then, cjc_limit));
                    details.push((format!("CJC {channel} baseline"), format!("{then:.2}")));
                    details.push((format!("CJC {channel} difference"), format!("{:.2}", now - then)));
                }
            }
            None => failed.extend(std::iter::repeat(false).take(CHANNELS as usize)),
        }

        let mut values = tc_uv;
        values.extend(cjc_c);
        Ok(Evaluation {
            values,
            failed,
            details,
        })
    }

    fn resume(&mut self) -> Result<(), BoardError> {
        Ok(())
    }

    fn recover(&mut self) {}

    fn close(&mut self) {
        if let Some(mut hat) = self.hat.take() {
            if let Err(e) = hat.close() {
                warn!("MCC 134 close: {e}");
            }
        }
    }

    fn clear_baseline(&mut self) {
        self.baseline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::testing::FakeBackend;

    #[test]
    fn tc_band_and_cjc_drift() {
        let fake = FakeBackend::new();
        let config = TestConfig::for_board(BoardKind::Mcc134);
        let mut test = ThermocoupleTest::new(&config, Box::new(fake.clone()));
        test.open().unwrap();
        test.configure().unwrap();
        {
            let mut state = fake.state.borrow_mut();
            state.cjc.extend([25.0, 25.0, 25.0, 25.0]);
        }
        test.begin().unwrap();
        {
            let mut state = fake.state.borrow_mut();
            state.tc_volts = vec![5e-6, -25e-6, 0.0, 0.0];
            // interleaved with TC reads: ch0..ch3
            state.cjc.extend([25.5, 25.0, 27.5, 22.0]);
        }
        let eval = test.sample().unwrap();
        assert_eq!(eval.values.len(), 8);
        assert_eq!(
            eval.failed,
            vec![false, true, false, false, false, false, true, true]
        );
        assert_eq!(eval.details.len(), 8);
        assert_eq!(test.layout().header()[5], "CJC 0");
    }

    #[test]
    fn cleared_baseline_skips_drift() {
        let fake = FakeBackend::new();
        let config = TestConfig::for_board(BoardKind::Mcc134);
        let mut test = ThermocoupleTest::new(&config, Box::new(fake.clone()));
        test.open().unwrap();
        test.begin().unwrap();
        test.clear_baseline();
        fake.state.borrow_mut().cjc.extend([90.0; 4]);
        let eval = test.sample().unwrap();
        assert!(!eval.failed.iter().any(|f| *f));
    }
}
