//! Heatmap of the result grid: K along x, eps along y.

use std::fs;
use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::grid::ResultGrid;
use crate::SweepError;

const COLORBAR_WIDTH: u32 = 160;
const COLORBAR_STEPS: usize = 256;
const NAN_COLOR: RGBColor = RGBColor(200, 200, 200);

// Diverging ice/fire palette, dark at the centre.
const ICE_FIRE: [(f64, (u8, u8, u8)); 9] = [
    (0.0, (183, 230, 226)),
    (0.17, (92, 173, 220)),
    (0.33, (62, 96, 193)),
    (0.45, (45, 40, 75)),
    (0.5, (31, 30, 33)),
    (0.55, (76, 31, 48)),
    (0.67, (173, 42, 52)),
    (0.83, (236, 110, 54)),
    (1.0, (255, 236, 176)),
];

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    #[serde_as(as = "DefaultOnNull")]
    pub vmin: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub vcenter: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub vmax: f64,
    /// Cells within this distance of `vcenter` are drawn white
    #[serde_as(as = "DefaultOnNull")]
    pub highlight_band: f64,
    /// Label every n-th cell along each axis
    #[serde_as(as = "DefaultOnNull")]
    pub tick_every: usize,
    #[serde_as(as = "DefaultOnNull")]
    pub width: u32,
    #[serde_as(as = "DefaultOnNull")]
    pub height: u32,
    pub caption: String,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            vmin: 0.3,
            vcenter: 0.5,
            vmax: 0.6,
            highlight_band: 0.0002,
            tick_every: 200,
            width: 1600,
            height: 800,
            caption: "Stationary probability of p >= 0.5".to_string(),
        }
    }
}

impl PlotSettings {
    pub fn validate(&self) -> Result<(), SweepError> {
        if !(self.vmin < self.vcenter && self.vcenter < self.vmax) {
            return Err(SweepError::InvalidConfig(
                "plot bounds must satisfy vmin < vcenter < vmax".to_string(),
            ));
        }
        if !(self.highlight_band.is_finite() && self.highlight_band >= 0.0) {
            return Err(SweepError::InvalidConfig(
                "plot highlight_band must be finite and non-negative".to_string(),
            ));
        }
        if self.tick_every == 0 {
            return Err(SweepError::InvalidConfig(
                "plot tick_every must be greater than zero".to_string(),
            ));
        }
        if self.width <= COLORBAR_WIDTH * 2 || self.height < 200 {
            return Err(SweepError::InvalidConfig(format!(
                "plot size must be wider than {} px and at least 200 px tall",
                COLORBAR_WIDTH * 2
            )));
        }
        Ok(())
    }

    /// Two-slope normalisation: `[vmin, vcenter]` maps onto `[0, 0.5]` and
    /// `[vcenter, vmax]` onto `[0.5, 1]`, clamped.
    pub fn normalize(&self, value: f64) -> f64 {
        let t = if value < self.vcenter {
            0.5 * (value - self.vmin) / (self.vcenter - self.vmin)
        } else {
            0.5 + 0.5 * (value - self.vcenter) / (self.vmax - self.vcenter)
        };
        t.clamp(0.0, 1.0)
    }

    pub fn is_highlighted(&self, value: f64) -> bool {
        (value - self.vcenter).abs() <= self.highlight_band
    }

    pub fn cell_color(&self, value: f64) -> RGBColor {
        if value.is_nan() {
            NAN_COLOR
        } else {
            ice_fire(self.normalize(value))
        }
    }
}

/// Linear interpolation through the palette stops, `t` in `[0, 1]`.
pub fn ice_fire(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let upper = ICE_FIRE
        .iter()
        .position(|&(stop, _)| stop >= t)
        .unwrap_or(ICE_FIRE.len() - 1)
        .max(1);
    let (t0, c0) = ICE_FIRE[upper - 1];
    let (t1, c1) = ICE_FIRE[upper];
    let w = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
    let mix = |a: u8, b: u8| (a as f64 + w * (b as f64 - a as f64)).round() as u8;
    RGBColor(mix(c0.0, c1.0), mix(c0.1, c1.1), mix(c0.2, c1.2))
}

fn axis_index(position: f64, len: usize) -> usize {
    (position.max(0.0) as usize).min(len.saturating_sub(1))
}

pub fn k_tick_label(k_values: &[f64], position: f64) -> String {
    if k_values.is_empty() {
        return String::new();
    }
    let k = k_values[axis_index(position, k_values.len())];
    if k.fract() == 0.0 {
        format!("{k:.0}")
    } else {
        format!("{k:.2}")
    }
}

pub fn eps_tick_label(eps_values: &[f64], position: f64) -> String {
    if eps_values.is_empty() {
        return String::new();
    }
    format!("{:.1e}", eps_values[axis_index(position, eps_values.len())])
}

fn label_count(len: usize, every: usize) -> usize {
    (len / every.max(1) + 1).max(2)
}

fn plot_error<E: std::fmt::Display>(err: E) -> SweepError {
    SweepError::Plot(err.to_string())
}

/// Renders the grid to a PNG with a colour bar on the right.
pub fn plot_heatmap(
    grid: &ResultGrid,
    settings: &PlotSettings,
    path: &Path,
) -> Result<(), SweepError> {
    settings.validate()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let (m, n) = grid.shape();
    let k_values = grid.k_values();
    let eps_values = grid.eps_values();

    let root = BitMapBackend::new(path, (settings.width, settings.height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let (main, bar) = root.split_horizontally(settings.width - COLORBAR_WIDTH);

    let mut chart = ChartBuilder::on(&main)
        .caption(&settings.caption, ("sans-serif", 30).into_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(100)
        .build_cartesian_2d(0.0..m as f64, 0.0..n as f64)
        .map_err(plot_error)?;

    let k_label = |x: &f64| k_tick_label(k_values, *x);
    let eps_label = |y: &f64| eps_tick_label(eps_values, *y);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("K")
        .y_desc("eps")
        .axis_desc_style(("sans-serif", 22))
        .x_labels(label_count(m, settings.tick_every))
        .y_labels(label_count(n, settings.tick_every))
        .x_label_formatter(&k_label)
        .y_label_formatter(&eps_label)
        .draw()
        .map_err(plot_error)?;

    // eps grows upward, so row j of the transposed grid sits at y = j.
    chart
        .draw_series((0..m).flat_map(|i| {
            (0..n).map(move |j| {
                let (x, y) = (i as f64, j as f64);
                Rectangle::new(
                    [(x, y), (x + 1.0, y + 1.0)],
                    settings.cell_color(grid.get(i, j)).filled(),
                )
            })
        }))
        .map_err(plot_error)?;

    chart
        .draw_series(
            (0..m)
                .flat_map(|i| (0..n).map(move |j| (i, j)))
                .filter(|&(i, j)| settings.is_highlighted(grid.get(i, j)))
                .map(|(i, j)| {
                    let (x, y) = (i as f64, j as f64);
                    Rectangle::new([(x, y), (x + 1.0, y + 1.0)], WHITE.filled())
                }),
        )
        .map_err(plot_error)?;

    draw_colorbar(&bar, settings)?;
    root.present().map_err(plot_error)?;
    Ok(())
}

fn draw_colorbar(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    settings: &PlotSettings,
) -> Result<(), SweepError> {
    let mut chart = ChartBuilder::on(area)
        .margin_top(70)
        .margin_bottom(80)
        .margin_right(20)
        .y_label_area_size(90)
        .build_cartesian_2d(0.0..1.0, settings.vmin..settings.vmax)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_desc("integral")
        .axis_desc_style(("sans-serif", 22))
        .y_labels(7)
        .draw()
        .map_err(plot_error)?;

    let span = settings.vmax - settings.vmin;
    let step = span / COLORBAR_STEPS as f64;
    chart
        .draw_series((0..COLORBAR_STEPS).map(|idx| {
            let lo = settings.vmin + idx as f64 * step;
            let color = settings.cell_color(lo + 0.5 * step);
            Rectangle::new([(0.0, lo), (1.0, lo + step)], color.filled())
        }))
        .map_err(plot_error)?;

    Ok(())
}
