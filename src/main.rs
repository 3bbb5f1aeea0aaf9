// src/main.rs
mod boards;
mod config;
mod cycle;
mod dmm;
mod drivers;
mod engine;
mod evaluator;
mod gui;
mod recorder;
mod reduce;
mod scheduler;
mod session;
mod types;
mod visualizer;
mod watchdog;

use anyhow::{anyhow, Result};
use clap::Parser;
use config::TestConfig;
use dmm::{DmmError, Hp34401a, Multimeter, SimMultimeter};
use drivers::{DaqHatsBackend, HatBackend, SimBackend};
use eframe::egui;
use egui::IconData;
use engine::TestEngine;
use image::GenericImageView;
use std::path::{Path, PathBuf};
use types::{BoardKind, ConnectionMode};

const ICON_PATH: &str = "/usr/share/mcc/daqhats/icon.png";
const SIM_DMM_NOISE_V: f64 = 1e-3;

/// CE test bench for MCC DAQ HAT boards.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Board model under test
    #[arg(long, value_enum)]
    board: BoardKind,
    /// JSON file overriding the board defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run against simulated hardware
    #[arg(long)]
    simulate: bool,
    /// HAT address on the stack
    #[arg(long)]
    address: Option<u8>,
    /// Directory for the CSV logs
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Serial port of the Prologix GPIB controller (MCC 152)
    #[arg(long)]
    dmm_port: Option<String>,
    /// Reopen the board after repeated acquisition faults
    #[arg(long)]
    watchdog: bool,
    /// Wait for the Start button even on boards that normally start on their own
    #[arg(long)]
    no_auto_start: bool,
}

impl Args {
    fn into_config(self) -> Result<TestConfig> {
        let mut config = TestConfig::load(self.board, self.config.as_deref())?;
        if self.simulate {
            config.mode = ConnectionMode::Simulation;
        }
        if let Some(address) = self.address {
            if address > 7 {
                return Err(anyhow!("HAT address {address} out of range 0-7"));
            }
            config.address = address;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(port) = self.dmm_port {
            config.dmm.port = port;
        }
        config.watchdog |= self.watchdog;
        if self.no_auto_start {
            config.auto_start = false;
        }
        Ok(config)
    }
}

fn backend(config: &TestConfig) -> Box<dyn HatBackend> {
    match config.mode {
        ConnectionMode::Simulation => Box::new(SimBackend::new(config.sim)),
        ConnectionMode::Hardware => Box::new(DaqHatsBackend),
    }
}

fn meter_factory(config: &TestConfig) -> boards::MeterFactory {
    let settings = config.dmm.clone();
    let level = config.ao_voltage;
    match config.mode {
        ConnectionMode::Simulation => Box::new(move || -> Result<Box<dyn Multimeter>, DmmError> {
            Ok(Box::new(SimMultimeter::new(level, SIM_DMM_NOISE_V)))
        }),
        ConnectionMode::Hardware => Box::new(move || -> Result<Box<dyn Multimeter>, DmmError> {
            Ok(Box::new(Hp34401a::open_serial(&settings)?))
        }),
    }
}

fn load_app_icon(path: &Path) -> Option<IconData> {
    let bytes = std::fs::read(path).ok()?;
    let dyn_img = image::load_from_memory(&bytes).ok()?;
    let (width, height) = dyn_img.dimensions();
    Some(IconData {
        rgba: dyn_img.to_rgba8().into_raw(),
        width,
        height,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Args::parse().into_config()?;
    log::info!(
        "{} at address {} ({:?}), logs in {}",
        config.board,
        config.address,
        config.mode,
        config.data_dir.display()
    );

    let title = config.board.title();
    let engine = TestEngine::new(
        config,
        Box::new(|config: &TestConfig| {
            boards::build(config, backend(config), meter_factory(config))
        }),
    );

    let mut viewport = egui::ViewportBuilder::default()
        .with_inner_size([900.0, 640.0])
        .with_min_inner_size([720.0, 480.0])
        .with_title(title.clone());
    if let Some(icon) = load_app_icon(Path::new(ICON_PATH)) {
        viewport = viewport.with_icon(icon);
    }
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| Box::new(gui::CeTestApp::new(engine))),
    )
    .map_err(|e| anyhow!("GUI failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::parse_from([
            "hatbench",
            "--board",
            "mcc152",
            "--simulate",
            "--address",
            "3",
            "--dmm-port",
            "/dev/ttyUSB1",
            "--watchdog",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.board, BoardKind::Mcc152);
        assert_eq!(config.mode, ConnectionMode::Simulation);
        assert_eq!(config.address, 3);
        assert_eq!(config.dmm.port, "/dev/ttyUSB1");
        assert!(config.watchdog);
        assert!(!config.auto_start);
    }

    #[test]
    fn auto_start_can_be_suppressed() {
        let args = Args::parse_from(["hatbench", "--board", "mcc118", "--no-auto-start"]);
        assert!(!args.into_config().unwrap().auto_start);
        let args = Args::parse_from(["hatbench", "--board", "mcc134"]);
        assert!(args.into_config().unwrap().auto_start);
    }

    #[test]
    fn address_is_range_checked() {
        let args = Args::parse_from(["hatbench", "--board", "mcc128", "--address", "8"]);
        assert!(args.into_config().is_err());
    }
}
