// src/config.rs
use crate::dmm::Measurement;
use crate::drivers::SimProfile;
use crate::types::{BoardKind, ConnectionMode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MCC128_MAX_AGGREGATE_RATE: f64 = 100_000.0;
pub const MCC152_AO_MAX_VOLTAGE: f64 = 5.0;

/// Acquisition shape for the scanning boards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub channel_count: usize,
    pub rate_hz: f64,
    pub samples_per_channel: u32,
}

impl ScanSettings {
    pub fn for_board(kind: BoardKind) -> Self {
        match kind {
            BoardKind::Mcc118 => Self {
                channel_count: 8,
                rate_hz: 12_500.0,
                samples_per_channel: 10_000,
            },
            BoardKind::Mcc128 => Self::mcc128(8, 12_500.0),
            BoardKind::Mcc134 => Self {
                channel_count: 4,
                rate_hz: 0.0,
                samples_per_channel: 0,
            },
            BoardKind::Mcc152 => Self {
                channel_count: 4,
                rate_hz: 0.0,
                samples_per_channel: 0,
            },
            BoardKind::Mcc172 => Self {
                channel_count: 2,
                rate_hz: 51_200.0,
                samples_per_channel: 20_000,
            },
        }
    }

    /// MCC 128 selector rules: 1-8 channels, aggregate rate capped at 100 kS/s,
    /// scan long enough to finish inside half a second.
    pub fn mcc128(channel_count: usize, rate_hz: f64) -> Self {
        let channel_count = channel_count.clamp(1, 8);
        let rate_hz = rate_hz.round().clamp(1.0, Self::mcc128_rate_max(channel_count));
        let samples_per_channel = ((rate_hz / 2.2) as u32).max(1);
        Self {
            channel_count,
            rate_hz,
            samples_per_channel,
        }
    }

    pub fn mcc128_rate_max(channel_count: usize) -> f64 {
        (MCC128_MAX_AGGREGATE_RATE / channel_count.max(1) as f64).floor()
    }
}

/// Pass/fail tolerances.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Analog band in mV (118/128/172) or AO error in mV (152).
    pub voltage_mv: f64,
    pub tc_uv: f64,
    pub cjc_c: f64,
}

impl Limits {
    pub fn for_board(kind: BoardKind) -> Self {
        let voltage_mv = match kind {
            BoardKind::Mcc118 => 25.0,
            BoardKind::Mcc128 => 3.5,
            BoardKind::Mcc134 => 0.0,
            BoardKind::Mcc152 => 50.0,
            BoardKind::Mcc172 => 4.985,
        };
        Self {
            voltage_mv,
            tc_uv: 20.0,
            cjc_c: 2.0,
        }
    }
}

/// Scheduling intervals of the sampling cycle, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub open_retry_ms: u64,
    pub baseline_to_sample_ms: u64,
    pub baseline_retry_ms: u64,
    pub sample_period_ms: u64,
    pub trigger_check_ms: u64,
    pub watchdog_reopen_ms: u64,
    pub activity_blink_ms: u64,
    /// Only boards whose instantaneous LED blinks back to off.
    pub inst_blink_ms: Option<u64>,
}

impl Timing {
    pub fn for_board(kind: BoardKind) -> Self {
        let triggered = matches!(kind, BoardKind::Mcc128 | BoardKind::Mcc172);
        let step = if triggered { 500 } else { 1000 };
        Self {
            open_retry_ms: 500,
            baseline_to_sample_ms: step,
            baseline_retry_ms: step,
            sample_period_ms: step,
            trigger_check_ms: 500,
            watchdog_reopen_ms: 500,
            activity_blink_ms: 100,
            inst_blink_ms: matches!(kind, BoardKind::Mcc118 | BoardKind::Mcc134).then_some(500),
        }
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

/// Prologix GPIB-USB link to the HP 34401A.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DmmSettings {
    pub port: String,
    pub baud_rate: u32,
    pub gpib_address: u8,
    pub timeout_ms: u64,
    #[serde(default)]
    pub measurement: Measurement,
}

impl Default for DmmSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_owned(),
            baud_rate: 115_200,
            gpib_address: 5,
            timeout_ms: 1_000,
            measurement: Measurement::Default,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestConfig {
    pub board: BoardKind,
    pub mode: ConnectionMode,
    pub address: u8,
    pub data_dir: PathBuf,
    pub watchdog: bool,
    pub auto_start: bool,
    pub scan: ScanSettings,
    pub limits: Limits,
    pub timing: Timing,
    pub dmm: DmmSettings,
    pub ao_voltage: f64,
    pub sim: SimProfile,
}

impl TestConfig {
    pub fn for_board(board: BoardKind) -> Self {
        Self {
            board,
            mode: ConnectionMode::Hardware,
            address: 0,
            data_dir: PathBuf::from("./data"),
            watchdog: false,
            auto_start: matches!(board, BoardKind::Mcc118 | BoardKind::Mcc134),
            scan: ScanSettings::for_board(board),
            limits: Limits::for_board(board),
            timing: Timing::for_board(board),
            dmm: DmmSettings::default(),
            ao_voltage: MCC152_AO_MAX_VOLTAGE,
            sim: SimProfile::default(),
        }
    }

    /// Board defaults, then the JSON file if one is given.
    pub fn load(board: BoardKind, path: Option<&Path>) -> Result<Self> {
        let mut config = Self::for_board(board);
        if let Some(path) = path {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let overrides: ConfigOverrides = serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?;
            overrides.apply(&mut config);
        }
        Ok(config)
    }

    /// Selector changes only exist for the MCC 128.
    pub fn set_mcc128_scan(&mut self, channel_count: usize, rate_hz: f64) {
        if self.board == BoardKind::Mcc128 {
            self.scan = ScanSettings::mcc128(channel_count, rate_hz);
        }
    }
}

/// Optional settings read from a JSON file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub mode: Option<ConnectionMode>,
    pub address: Option<u8>,
    pub data_dir: Option<PathBuf>,
    pub watchdog: Option<bool>,
    pub auto_start: Option<bool>,
    pub channel_count: Option<usize>,
    pub rate_hz: Option<f64>,
    pub voltage_limit_mv: Option<f64>,
    pub tc_limit_uv: Option<f64>,
    pub cjc_limit_c: Option<f64>,
    pub timing: Option<Timing>,
    pub dmm: Option<DmmSettings>,
    pub sim: Option<SimProfile>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut TestConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(watchdog) = self.watchdog {
            config.watchdog = watchdog;
        }
        if let Some(auto_start) = self.auto_start {
            config.auto_start = auto_start;
        }
        if self.channel_count.is_some() || self.rate_hz.is_some() {
            let channels = self.channel_count.unwrap_or(config.scan.channel_count);
            let rate = self.rate_hz.unwrap_or(config.scan.rate_hz);
            config.set_mcc128_scan(channels, rate);
        }
        if let Some(limit) = self.voltage_limit_mv {
            config.limits.voltage_mv = limit;
        }
        if let Some(limit) = self.tc_limit_uv {
            config.limits.tc_uv = limit;
        }
        if let Some(limit) = self.cjc_limit_c {
            config.limits.cjc_c = limit;
        }
        if let Some(timing) = self.timing {
            config.timing = timing;
        }
        if let Some(dmm) = self.dmm {
            config.dmm = dmm;
        }
        if let Some(sim) = self.sim {
            config.sim = sim;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn board_defaults() {
        let c = TestConfig::for_board(BoardKind::Mcc172);
        assert_eq!(c.scan.samples_per_channel, 20_000);
        assert_eq!(c.limits.voltage_mv, 4.985);
        assert_eq!(c.timing.sample_period_ms, 500);
        assert!(c.timing.inst_blink_ms.is_none());
        assert!(!c.auto_start);

        let c = TestConfig::for_board(BoardKind::Mcc134);
        assert!(c.auto_start);
        assert_eq!(c.timing.inst_blink_ms, Some(500));
        assert_eq!(c.timing.baseline_to_sample_ms, 1000);
    }

    #[test]
    fn mcc128_selectors_clamp() {
        let s = ScanSettings::mcc128(4, 80_000.0);
        assert_eq!(s.rate_hz, 25_000.0);
        assert_eq!(s.samples_per_channel, 11_363);

        let s = ScanSettings::mcc128(12, 1.0);
        assert_eq!(s.channel_count, 8);
        assert_eq!(s.samples_per_channel, 1);

        assert_eq!(ScanSettings::for_board(BoardKind::Mcc128).samples_per_channel, 5_681);
    }

    #[test]
    fn selectors_ignored_for_fixed_boards() {
        let mut c = TestConfig::for_board(BoardKind::Mcc118);
        c.set_mcc128_scan(2, 1000.0);
        assert_eq!(c.scan.channel_count, 8);
    }

    #[test]
    fn json_overrides_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"watchdog": true, "channel_count": 2, "voltage_limit_mv": 1.5, "mode": "simulation"}}"#
        )
        .unwrap();
        let c = TestConfig::load(BoardKind::Mcc128, Some(file.path())).unwrap();
        assert!(c.watchdog);
        assert_eq!(c.mode, ConnectionMode::Simulation);
        assert_eq!(c.scan.channel_count, 2);
        assert_eq!(c.scan.rate_hz, 12_500.0);
        assert_eq!(c.limits.voltage_mv, 1.5);
    }

    #[test]
    fn unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bogus": 1}}"#).unwrap();
        assert!(TestConfig::load(BoardKind::Mcc118, Some(file.path())).is_err());
    }
}
