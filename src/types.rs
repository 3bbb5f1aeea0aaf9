// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

// Where the samples come from
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Simulation,
    #[default]
    Hardware,
}

/// DAQ HAT models the bench knows how to exercise.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BoardKind {
    /// 8 channel analog input, 12 bit
    Mcc118,
    /// 8 channel analog input, 16 bit, external trigger
    Mcc128,
    /// 4 channel thermocouple input
    Mcc134,
    /// 8 bit DIO + 2 channel analog output
    Mcc152,
    /// 2 channel IEPE / dynamic signal input
    Mcc172,
}

impl BoardKind {
    pub const ALL: [BoardKind; 5] = [
        BoardKind::Mcc118,
        BoardKind::Mcc128,
        BoardKind::Mcc134,
        BoardKind::Mcc152,
        BoardKind::Mcc172,
    ];

    /// Lower-case tag used for log file names and the C symbol prefix.
    pub fn tag(self) -> &'static str {
        match self {
            BoardKind::Mcc118 => "mcc118",
            BoardKind::Mcc128 => "mcc128",
            BoardKind::Mcc134 => "mcc134",
            BoardKind::Mcc152 => "mcc152",
            BoardKind::Mcc172 => "mcc172",
        }
    }

    pub fn title(self) -> String {
        format!("{self} CE Test")
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let number = &self.tag()[3..];
        write!(f, "MCC {number}")
    }
}

// Indicator colours
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Led {
    #[default]
    Off,
    Green,
    Red,
}

// Sampling cycle states
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingDevice,
    BaselineCapture,
    Sampling,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Idle => "idle",
            Phase::AwaitingDevice => "awaiting device",
            Phase::BaselineCapture => "capturing baseline",
            Phase::Sampling => "sampling",
        };
        f.write_str(text)
    }
}

/// How a scan block is collapsed to one value per channel.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Reduction {
    Mean,
    Rms,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ValueFormat {
    Decimal(usize),
    Bit,
}

/// One value column of the display table and the CSV file.
#[derive(Clone, Debug)]
pub struct Column {
    pub label: String,
    pub unit: &'static str,
    pub format: ValueFormat,
}

impl Column {
    pub fn new(label: impl Into<String>, unit: &'static str, format: ValueFormat) -> Self {
        Self {
            label: label.into(),
            unit,
            format,
        }
    }

    pub fn render(&self, value: f64) -> String {
        match self.format {
            ValueFormat::Decimal(places) => format!("{value:.places$}"),
            ValueFormat::Bit => format!("{}", value as u8),
        }
    }
}

/// Column set of one board: value columns plus the counters kept per failure source.
#[derive(Clone, Debug)]
pub struct ChannelLayout {
    pub columns: Vec<Column>,
    pub failure_labels: Vec<String>,
}

impl ChannelLayout {
    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.columns.len() + 2);
        header.push("Time".to_owned());
        header.extend(self.columns.iter().map(|c| c.label.clone()));
        header.push("Status".to_owned());
        header
    }

    pub fn render(&self, values: &[f64]) -> Vec<String> {
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| column.render(*value))
            .collect()
    }
}

/// Result of one evaluated sampling step.
#[derive(Clone, Debug, Default)]
pub struct Evaluation {
    /// aligned with `ChannelLayout::columns`
    pub values: Vec<f64>,
    /// aligned with `ChannelLayout::failure_labels`
    pub failed: Vec<bool>,
    /// extra read-outs shown on screen only (label, text)
    pub details: Vec<(String, String)>,
}

impl Evaluation {
    pub fn any_failed(&self) -> bool {
        self.failed.iter().any(|f| *f)
    }
}

// Trailing CSV status text
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum RowStatus {
    Ok,
    SoftwareError,
    TriggerError,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Ok => "",
            RowStatus::SoftwareError => "Software error",
            RowStatus::TriggerError => "Trigger error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_names_follow_vendor_style() {
        assert_eq!(BoardKind::Mcc134.to_string(), "MCC 134");
        assert_eq!(BoardKind::Mcc172.title(), "MCC 172 CE Test");
        assert_eq!(BoardKind::Mcc118.tag(), "mcc118");
    }

    #[test]
    fn layout_header_wraps_columns() {
        let layout = ChannelLayout {
            columns: vec![
                Column::new("Ch 0", "mV", ValueFormat::Decimal(1)),
                Column::new("DIn 4", "", ValueFormat::Bit),
            ],
            failure_labels: vec!["Ch 0".into()],
        };
        assert_eq!(layout.header(), vec!["Time", "Ch 0", "DIn 4", "Status"]);
        assert_eq!(layout.render(&[-3.14159, 1.0]), vec!["-3.1", "1"]);
    }
}
