// src/gui.rs
use crate::config::{ScanSettings, TestConfig};
use crate::engine::TestEngine;
use crate::types::{BoardKind, ChannelLayout};
use crate::visualizer;
use eframe::egui;
use egui::{Color32, RichText};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const TREND_POINTS: usize = 300;
const IDLE_REPAINT: Duration = Duration::from_millis(250);

pub struct CeTestApp {
    engine: TestEngine,
    // trend buffers, one per plotted column
    trend_columns: Vec<usize>,
    trend: Vec<VecDeque<[f64; 2]>>,
    band: Option<f64>,
    last_test_count: u64,
    // MCC 128 selectors
    channel_count: usize,
    rate_hz: f64,
    watchdog: bool,
}

impl CeTestApp {
    pub fn new(mut engine: TestEngine) -> Self {
        let config = engine.config().clone();
        let (trend_columns, band) = trend_setup(config.board, engine.cycle().layout(), &config);
        if config.auto_start {
            engine.start(Instant::now());
        }
        Self {
            trend: vec![VecDeque::new(); trend_columns.len()],
            trend_columns,
            band,
            last_test_count: 0,
            channel_count: config.scan.channel_count,
            rate_hz: config.scan.rate_hz,
            watchdog: config.watchdog,
            engine,
        }
    }

    fn clear_trend(&mut self) {
        for points in &mut self.trend {
            points.clear();
        }
        self.last_test_count = 0;
    }

    fn rebuild_trend(&mut self) {
        let config = self.engine.config().clone();
        let (columns, band) = trend_setup(config.board, self.engine.cycle().layout(), &config);
        self.trend = vec![VecDeque::new(); columns.len()];
        self.trend_columns = columns;
        self.band = band;
        self.last_test_count = 0;
    }

    fn collect_trend(&mut self) {
        let count = self.engine.cycle().tally().test_count;
        if count == self.last_test_count {
            return;
        }
        self.last_test_count = count;
        let values = &self.engine.cycle().latest().values;
        for (points, &column) in self.trend.iter_mut().zip(&self.trend_columns) {
            if let Some(value) = values.get(column) {
                points.push_back([count as f64, *value]);
                if points.len() > TREND_POINTS {
                    points.pop_front();
                }
            }
        }
    }

    fn device_panel(&self, ui: &mut egui::Ui) {
        let leds = self.engine.leds();
        let cycle = self.engine.cycle();
        ui.label(RichText::new("DEVICE").strong());
        egui::Grid::new("device_grid").num_columns(2).show(ui, |ui| {
            ui.label("Serial:");
            ui.monospace(cycle.session().serial().unwrap_or("-"));
            ui.end_row();
            ui.label("Software errors:");
            ui.monospace(cycle.tally().software_errors.to_string());
            ui.end_row();
            if cycle.session().has_trigger_check() {
                ui.label("Trigger errors:");
                ui.monospace(cycle.tally().trigger_errors.to_string());
                ui.end_row();
            }
            ui.label("State:");
            ui.monospace(format!("{} / {:?}", cycle.phase(), cycle.session().state()));
            ui.end_row();
            ui.label("Watchdog count:");
            ui.monospace(cycle.watchdog().count().to_string());
            ui.end_row();
        });
        visualizer::led_row(ui, "Ready", leds.ready);
        visualizer::led_row(ui, "Activity", leds.activity);
    }

    fn test_panel(&mut self, ui: &mut egui::Ui) {
        let now = Instant::now();
        let running = self.engine.is_running();
        ui.label(RichText::new("TEST").strong());
        ui.horizontal(|ui| {
            if ui.add_enabled(!running, egui::Button::new("Start")).clicked() {
                self.clear_trend();
                self.engine.start(now);
            }
            if ui.add_enabled(running, egui::Button::new("Stop")).clicked() {
                self.engine.stop();
            }
            if ui.button("Reset").clicked() {
                self.clear_trend();
                self.engine.reset(now);
            }
        });
        if ui
            .add_enabled(!running, egui::Checkbox::new(&mut self.watchdog, "Watchdog"))
            .changed()
            && !self.engine.set_watchdog(self.watchdog)
        {
            self.watchdog = self.engine.config().watchdog;
        }

        if self.engine.kind() == BoardKind::Mcc128 {
            self.scan_selectors(ui, running);
        }

        let leds = self.engine.leds();
        visualizer::led_row(ui, "Pass", leds.overall);
        visualizer::led_row(ui, "Instantaneous", leds.instantaneous);
        ui.label(format!("Tests: {}", self.engine.cycle().tally().test_count));
        if let Some(path) = self.engine.cycle().log_path() {
            ui.label(RichText::new(path.display().to_string()).small());
        }
    }

    fn scan_selectors(&mut self, ui: &mut egui::Ui, running: bool) {
        let mut changed = false;
        ui.add_enabled_ui(!running, |ui| {
            egui::ComboBox::from_label("Channels")
                .selected_text(self.channel_count.to_string())
                .show_ui(ui, |ui| {
                    for n in 1..=8 {
                        changed |= ui.selectable_value(&mut self.channel_count, n, n.to_string()).changed();
                    }
                });
            let rate_max = ScanSettings::mcc128_rate_max(self.channel_count);
            self.rate_hz = self.rate_hz.min(rate_max);
            changed |= ui
                .add(egui::Slider::new(&mut self.rate_hz, 1.0..=rate_max).text("S/s").integer())
                .changed();
        });
        if changed && self.engine.set_mcc128_scan(self.channel_count, self.rate_hz) {
            let scan = self.engine.scan();
            self.channel_count = scan.channel_count;
            self.rate_hz = scan.rate_hz;
            self.rebuild_trend();
        }
    }

    fn values_table(&self, ui: &mut egui::Ui) {
        let cycle = self.engine.cycle();
        let layout = cycle.layout();
        let latest = cycle.latest();
        let tally = cycle.tally();
        egui::Grid::new("values_grid")
            .num_columns(4)
            .striped(true)
            .show(ui, |ui| {
                ui.label(RichText::new("Channel").strong());
                ui.label(RichText::new("Value").strong());
                ui.label(RichText::new("Unit").strong());
                ui.label(RichText::new("Failures").strong());
                ui.end_row();
                for (i, column) in layout.columns.iter().enumerate() {
                    ui.label(&column.label);
                    ui.monospace(column.render(latest.values.get(i).copied().unwrap_or(0.0)));
                    ui.label(column.unit);
                    match layout.failure_labels.iter().position(|l| *l == column.label) {
                        Some(f) => ui.monospace(tally.failures.get(f).copied().unwrap_or(0).to_string()),
                        None => ui.label(""),
                    };
                    ui.end_row();
                }
                // failure sources without a value column of their own
                for (f, label) in layout.failure_labels.iter().enumerate() {
                    if layout.columns.iter().any(|c| c.label == *label) {
                        continue;
                    }
                    ui.label(label);
                    ui.label("");
                    ui.label("");
                    ui.monospace(tally.failures.get(f).copied().unwrap_or(0).to_string());
                    ui.end_row();
                }
            });
        if !latest.details.is_empty() {
            ui.add_space(6.0);
            egui::Grid::new("details_grid").num_columns(2).show(ui, |ui| {
                for (label, text) in &latest.details {
                    ui.label(label);
                    ui.monospace(text);
                    ui.end_row();
                }
            });
        }
    }

    fn alert_window(&mut self, ctx: &egui::Context) {
        let Some(text) = self.engine.alert().map(str::to_owned) else {
            return;
        };
        egui::Window::new("Error")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(RichText::new(text).color(Color32::LIGHT_RED));
                if ui.button("OK").clicked() {
                    self.engine.dismiss_alert();
                }
            });
    }
}

/// Which columns go on the trend plot, and the tolerance band drawn with them.
fn trend_setup(
    kind: BoardKind,
    layout: &ChannelLayout,
    config: &TestConfig,
) -> (Vec<usize>, Option<f64>) {
    let units = |unit: &str| -> Vec<usize> {
        layout
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.unit == unit)
            .map(|(i, _)| i)
            .collect()
    };
    match kind {
        BoardKind::Mcc118 | BoardKind::Mcc128 | BoardKind::Mcc172 => {
            ((0..layout.columns.len()).collect(), Some(config.limits.voltage_mv))
        }
        BoardKind::Mcc134 => (units("µV"), Some(config.limits.tc_uv)),
        BoardKind::Mcc152 => (units("V"), None),
    }
}

impl eframe::App for CeTestApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        let next = self.engine.poll(now);
        self.collect_trend();

        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::SidePanel::left("controls").min_width(260.0).show(ctx, |ui| {
            ui.add_space(10.0);
            ui.heading(self.engine.kind().title());
            ui.separator();
            self.device_panel(ui);
            ui.separator();
            self.test_panel(ui);
            ui.separator();
            ui.label("LOG");
            egui::ScrollArea::vertical().max_height(160.0).show(ui, |ui| {
                for message in self.engine.messages() {
                    ui.monospace(message);
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.values_table(ui);
            ui.separator();
            let labels: Vec<String> = self
                .trend_columns
                .iter()
                .filter_map(|&c| self.engine.cycle().layout().columns.get(c))
                .map(|c| c.label.clone())
                .collect();
            visualizer::draw_trend(ui, &labels, &self.trend, self.band);
        });

        self.alert_window(ctx);

        let wait = next
            .map(|due| due.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_REPAINT);
        ctx.request_repaint_after(wait.min(IDLE_REPAINT));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.engine.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ValueFormat};

    #[test]
    fn trend_follows_board_units() {
        let layout = ChannelLayout {
            columns: vec![
                Column::new("TC 0", "µV", ValueFormat::Decimal(1)),
                Column::new("CJC 0", "°C", ValueFormat::Decimal(1)),
            ],
            failure_labels: vec!["TC 0".into(), "CJC 0".into()],
        };
        let config = TestConfig::for_board(BoardKind::Mcc134);
        assert_eq!(trend_setup(BoardKind::Mcc134, &layout, &config), (vec![0], Some(20.0)));

        let config = TestConfig::for_board(BoardKind::Mcc118);
        let (columns, band) = trend_setup(BoardKind::Mcc118, &layout, &config);
        assert_eq!(columns, vec![0, 1]);
        assert_eq!(band, Some(25.0));
    }
}
