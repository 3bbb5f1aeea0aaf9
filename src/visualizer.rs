// src/visualizer.rs
use crate::types::Led;
use eframe::egui;
use egui::{Color32, Stroke, Vec2};
use egui_plot::{HLine, Legend, Line, Plot, PlotPoints};
use std::collections::VecDeque;

const LED_OFF: Color32 = Color32::from_rgb(60, 60, 65);
const LED_GREEN: Color32 = Color32::from_rgb(0, 200, 60);
const LED_RED: Color32 = Color32::from_rgb(220, 40, 40);

pub fn led_color(state: Led) -> Color32 {
    match state {
        Led::Off => LED_OFF,
        Led::Green => LED_GREEN,
        Led::Red => LED_RED,
    }
}

/// Round indicator lamp.
pub fn draw_led(ui: &mut egui::Ui, state: Led, size: f32) -> egui::Response {
    let (response, painter) = ui.allocate_painter(Vec2::splat(size), egui::Sense::hover());
    let center = response.rect.center();
    let radius = size / 2.0 - 1.0;
    painter.circle_filled(center, radius, led_color(state));
    painter.circle_stroke(center, radius, Stroke::new(1.0, Color32::from_rgb(80, 80, 85)));
    response
}

pub fn led_row(ui: &mut egui::Ui, label: &str, state: Led) {
    ui.horizontal(|ui| {
        ui.label(label);
        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
            draw_led(ui, state, 18.0);
        });
    });
}

/// One trace per series, x = test number, with the tolerance band drawn as two lines.
pub fn draw_trend(
    ui: &mut egui::Ui,
    labels: &[String],
    series: &[VecDeque<[f64; 2]>],
    band: Option<f64>,
) {
    let colors = [
        Color32::from_rgb(0, 255, 255),
        Color32::YELLOW,
        Color32::from_rgb(255, 0, 255),
        Color32::from_rgb(120, 200, 80),
        Color32::from_rgb(255, 140, 0),
        Color32::from_rgb(100, 140, 255),
        Color32::from_rgb(255, 120, 160),
        Color32::LIGHT_GRAY,
    ];
    let mut plot = Plot::new("trend_plot")
        .legend(Legend::default())
        .auto_bounds_x()
        .allow_scroll(false);
    if let Some(limit) = band {
        plot = plot.include_y(limit * 1.2).include_y(-limit * 1.2);
    }
    plot.show(ui, |plot_ui| {
        for (i, points) in series.iter().enumerate() {
            if points.is_empty() {
                continue;
            }
            let name = labels.get(i).cloned().unwrap_or_default();
            let color = colors[i % colors.len()];
            let points: Vec<[f64; 2]> = points.iter().copied().collect();
            plot_ui.line(Line::new(PlotPoints::new(points)).name(name).color(color));
        }
        if let Some(limit) = band {
            plot_ui.hline(HLine::new(limit).color(LED_RED).name("limit"));
            plot_ui.hline(HLine::new(-limit).color(LED_RED));
        }
    });
}
