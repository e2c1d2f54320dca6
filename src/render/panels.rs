// src/render/panels.rs

use super::scale::{fixed_ticks, nice_ticks, LinearScale, Ticks};
use super::svg::{Anchor, Stroke, Svg, TextStyle};
use crate::aggregate::TimeSeries;
use crate::config::{DatasetConfig, Threshold};
use crate::report::format_number;

const COLUMNS: usize = 3;
const PANEL_W: f64 = 420.0;
const PANEL_H: f64 = 320.0;
const HEADER: f64 = 70.0;
const FOOTER: f64 = 40.0;

const PAD_LEFT: f64 = 60.0;
const PAD_RIGHT: f64 = 20.0;
const PAD_TOP: f64 = 40.0;
const PAD_BOTTOM: f64 = 70.0;

const LINE: &str = "#1f6aa5";
const THRESHOLD: &str = "#d62728";
const GRID: &str = "#cccccc";
const AXIS: &str = "#555555";

/// Axis ticks for one panel: `[0, y_max]` when fixed, else fitted to the
/// data and the threshold so the threshold line is always on the chart.
fn panel_ticks(series: &TimeSeries, threshold: Option<&Threshold>, y_max: Option<f64>) -> Ticks {
    if let Some(max) = y_max {
        return fixed_ticks(max, 5);
    }
    let (mut lo, mut hi) = series.min_max().unwrap_or((0.0, 0.0));
    if let Some(t) = threshold {
        lo = lo.min(t.value);
        hi = hi.max(t.value);
    }
    nice_ticks(lo.min(0.0), hi, 5)
}

/// Evenly thinned label positions, at most six per panel.
fn panel_tick_indices(len: usize) -> Vec<usize> {
    let step = len.div_ceil(6).max(1);
    (0..len).step_by(step).collect()
}

#[allow(clippy::too_many_arguments)]
fn draw_panel(
    svg: &mut Svg,
    ox: f64,
    oy: f64,
    region: &str,
    series: &TimeSeries,
    ds: &DatasetConfig,
    threshold: Option<&Threshold>,
    y_max: Option<f64>,
) {
    let (x0, x1) = (ox + PAD_LEFT, ox + PANEL_W - PAD_RIGHT);
    let (y_top, y_bottom) = (oy + PAD_TOP, oy + PANEL_H - PAD_BOTTOM);

    svg.text(
        (x0 + x1) / 2.0,
        oy + 24.0,
        region,
        TextStyle {
            size: 16.0,
            anchor: Anchor::Middle,
            bold: true,
            color: "#222222",
            ..Default::default()
        },
    );
    svg.rect(x0, y_top, x1 - x0, y_bottom - y_top, "#fbfbfb", Some(Stroke::solid(AXIS, 0.8)));

    if series.is_empty() {
        svg.text(
            (x0 + x1) / 2.0,
            (y_top + y_bottom) / 2.0,
            "無資料",
            TextStyle {
                size: 14.0,
                anchor: Anchor::Middle,
                color: "#888888",
                ..Default::default()
            },
        );
        return;
    }

    let points = series.points();
    let ticks = panel_ticks(series, threshold, y_max);
    let y = LinearScale::new((ticks.lo, ticks.hi), (y_bottom, y_top));
    let x = LinearScale::new(
        (0.0, points.len().saturating_sub(1) as f64),
        (x0 + 12.0, x1 - 12.0),
    );

    let grid = Stroke::dashed(GRID, 1.0, "3 3").with_opacity(0.7);
    let decimals = ticks.decimals().max(1);
    for v in &ticks.values {
        let py = y.map(*v);
        svg.line(x0, py, x1, py, grid);
        svg.text(
            x0 - 6.0,
            py + 4.0,
            &format_number(*v, decimals),
            TextStyle {
                size: 10.0,
                anchor: Anchor::End,
                color: AXIS,
                ..Default::default()
            },
        );
    }
    for i in panel_tick_indices(points.len()) {
        let px = x.map(i as f64);
        svg.text(
            px,
            y_bottom + 14.0,
            &points[i].label,
            TextStyle {
                size: 10.0,
                anchor: Anchor::End,
                color: AXIS,
                rotate: -45.0,
                ..Default::default()
            },
        );
    }

    if let Some(t) = threshold {
        if t.value >= ticks.lo && t.value <= ticks.hi {
            let py = y.map(t.value);
            svg.line(x0, py, x1, py, Stroke::dashed(THRESHOLD, 1.5, "6 4"));
            svg.text(
                x1 - 4.0,
                py - 5.0,
                &t.label,
                TextStyle {
                    size: 10.0,
                    anchor: Anchor::End,
                    color: THRESHOLD,
                    ..Default::default()
                },
            );
        }
    }

    let coords: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (x.map(i as f64), y.map_clamped(p.value)))
        .collect();
    svg.polyline(&coords, Stroke::solid(LINE, 2.0));
    for (px, py) in &coords {
        svg.circle(*px, *py, 3.0, LINE);
    }

    if let (Some(p), Some((px, py))) = (series.latest(), coords.last()) {
        svg.text(
            *px,
            (py - 10.0).max(y_top + 12.0),
            &format!("{}{}", format_number(p.value, ds.decimals), ds.unit),
            TextStyle {
                size: 11.0,
                anchor: Anchor::End,
                color: "#0d3b66",
                bold: true,
                ..Default::default()
            },
        );
    }
}

/// Small multiples, one panel per configured region in a three-column grid.
pub fn render_region_panels(
    panels: &[(String, TimeSeries)],
    ds: &DatasetConfig,
    threshold: Option<&Threshold>,
    y_max: Option<f64>,
) -> String {
    let cols = panels.len().clamp(1, COLUMNS);
    let rows = panels.len().div_ceil(COLUMNS).max(1);
    let width = cols as f64 * PANEL_W;
    let height = HEADER + rows as f64 * PANEL_H + FOOTER;

    let mut svg = Svg::new(width, height);
    svg.text(
        width / 2.0,
        40.0,
        &ds.title,
        TextStyle {
            size: 22.0,
            anchor: Anchor::Middle,
            bold: true,
            color: "#222222",
            ..Default::default()
        },
    );

    for (i, (region, series)) in panels.iter().enumerate() {
        let ox = (i % COLUMNS) as f64 * PANEL_W;
        let oy = HEADER + (i / COLUMNS) as f64 * PANEL_H;
        draw_panel(&mut svg, ox, oy, region, series, ds, threshold, y_max);
    }

    svg.text(
        width / 2.0,
        height - 14.0,
        &format!("{}：{}", ds.x_label, ds.y_label),
        TextStyle {
            size: 12.0,
            anchor: Anchor::Middle,
            color: AXIS,
            ..Default::default()
        },
    );
    svg.finish()
}
