// src/dmm.rs
//! HP 34401A bench multimeter behind a Prologix GPIB-USB controller.
use crate::config::DmmSettings;
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;

const CLS_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum DmmError {
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("link closed")]
    Closed,
    #[error("unparseable reading {0:?}")]
    Parse(String),
}

/// Resolution / range pair sent with `MEAS:VOLT:DC?`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    #[default]
    Default,
    FineResolution,
    FineResolutionMinRange,
}

impl Measurement {
    fn command(self) -> &'static str {
        match self {
            Measurement::Default => ":MEAS:VOLT:DC? DEF,DEF",
            Measurement::FineResolution => ":MEAS:VOLT:DC? DEF,MIN",
            Measurement::FineResolutionMinRange => ":MEAS:VOLT:DC? MIN,MIN",
        }
    }
}

pub trait Multimeter {
    /// DC volts.
    fn read_voltage(&mut self, measurement: Measurement) -> Result<f64, DmmError>;
    fn display(&mut self, text: &str) -> Result<(), DmmError>;
}

pub struct Hp34401a<T: Read + Write> {
    link: T,
}

impl Hp34401a<Box<dyn serialport::SerialPort>> {
    pub fn open_serial(settings: &DmmSettings) -> Result<Self, DmmError> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()?;
        info!("DMM link open on {}", settings.port);
        Self::connect(port, settings.gpib_address)
    }
}

impl<T: Read + Write> Hp34401a<T> {
    /// Puts the controller in charge of `gpib_address` and readies the meter for DC volts.
    pub fn connect(link: T, gpib_address: u8) -> Result<Self, DmmError> {
        let mut dmm = Self { link };
        dmm.send("++mode 1")?;
        dmm.send(&format!("++addr {gpib_address}"))?;
        dmm.send("++auto 0")?;
        dmm.send("++eoi 1")?;

        // the first command after the meter powers up is dropped
        let mut attempt = 1;
        loop {
            dmm.send("*CLS")?;
            match dmm.query("*OPC?") {
                Ok(_) => break,
                Err(e) if attempt < CLS_ATTEMPTS => {
                    debug!("*CLS attempt {attempt} unanswered: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        dmm.send("INP:IMP:AUTO ON")?;
        dmm.send("CONF:VOLT:DC")?;
        Ok(dmm)
    }

    fn send(&mut self, line: &str) -> Result<(), DmmError> {
        self.link.write_all(line.as_bytes())?;
        self.link.write_all(b"\n")?;
        self.link.flush()?;
        Ok(())
    }

    fn query(&mut self, line: &str) -> Result<String, DmmError> {
        self.send(line)?;
        self.send("++read eoi")?;
        self.read_line()
    }

    fn read_line(&mut self) -> Result<String, DmmError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.link.read(&mut byte) {
                Ok(0) => return Err(DmmError::Closed),
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(String::from_utf8_lossy(&line).trim().to_owned())
    }
}

impl<T: Read + Write> Multimeter for Hp34401a<T> {
    fn read_voltage(&mut self, measurement: Measurement) -> Result<f64, DmmError> {
        let reply = self.query(measurement.command())?;
        reply.parse::<f64>().map_err(|_| DmmError::Parse(reply))
    }

    fn display(&mut self, text: &str) -> Result<(), DmmError> {
        self.send(&format!("DISP:TEXT \"{text}\""))
    }
}

impl<T: Read + Write> Drop for Hp34401a<T> {
    fn drop(&mut self) {
        if let Err(e) = self.send("++loc") {
            warn!("DMM did not return to local: {e}");
        }
    }
}

/// Meter that reads back a fixed level plus uniform noise.
#[derive(Clone, Debug)]
pub struct SimMultimeter {
    pub level_v: f64,
    pub noise_v: f64,
}

impl SimMultimeter {
    pub fn new(level_v: f64, noise_v: f64) -> Self {
        Self { level_v, noise_v }
    }
}

impl Multimeter for SimMultimeter {
    fn read_voltage(&mut self, _measurement: Measurement) -> Result<f64, DmmError> {
        let noise = self.noise_v.abs();
        if noise == 0.0 {
            return Ok(self.level_v);
        }
        Ok(self.level_v + rand::thread_rng().gen_range(-noise..=noise))
    }

    fn display(&mut self, _text: &str) -> Result<(), DmmError> {
        Ok(())
    }
}
