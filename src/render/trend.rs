// src/render/trend.rs

use super::scale::{nice_ticks, LinearScale};
use super::svg::{Anchor, Stroke, Svg, TextStyle};
use crate::aggregate::TimeSeries;
use crate::config::DatasetConfig;
use crate::report::format_number;

const WIDTH: f64 = 1200.0;
const HEIGHT: f64 = 600.0;
const LEFT: f64 = 100.0;
const RIGHT: f64 = 40.0;
const TOP: f64 = 70.0;
const BOTTOM: f64 = 120.0;

const LINE: &str = "#1f6aa5";
const FILL: &str = "#9ec5e5";
const GRID: &str = "#cccccc";
const AXIS: &str = "#555555";

/// Indices of points that get an x tick label.
pub fn tick_indices(len: usize) -> Vec<usize> {
    if len <= 24 {
        return (0..len).collect();
    }
    let step = (len / 12).max(1);
    (0..len).step_by(step).collect()
}

/// Nationwide trend: line with markers over a filled area down to zero.
pub fn render_trend(series: &TimeSeries, ds: &DatasetConfig) -> String {
    let mut svg = Svg::new(WIDTH, HEIGHT);
    svg.text(
        WIDTH / 2.0,
        40.0,
        &ds.title,
        TextStyle {
            size: 24.0,
            anchor: Anchor::Middle,
            bold: true,
            color: "#222222",
            ..Default::default()
        },
    );

    let points = series.points();
    let (x0, x1) = (LEFT, WIDTH - RIGHT);
    let (y_top, y_bottom) = (TOP, HEIGHT - BOTTOM);

    let (_, hi) = series.min_max().unwrap_or((0.0, 0.0));
    let ticks = nice_ticks(0.0, hi.max(0.0), 6);
    let y = LinearScale::new((ticks.lo, ticks.hi), (y_bottom, y_top));
    let x = LinearScale::new((0.0, points.len().saturating_sub(1) as f64), (x0 + 10.0, x1 - 10.0));

    let grid = Stroke::dashed(GRID, 1.0, "4 4").with_opacity(0.6);
    let tick_decimals = ticks.decimals();
    for v in &ticks.values {
        let py = y.map(*v);
        svg.line(x0, py, x1, py, grid);
        svg.text(
            x0 - 8.0,
            py + 4.0,
            &format_number(*v, tick_decimals),
            TextStyle {
                size: 12.0,
                anchor: Anchor::End,
                color: AXIS,
                ..Default::default()
            },
        );
    }

    for i in tick_indices(points.len()) {
        let px = x.map(i as f64);
        svg.line(px, y_top, px, y_bottom, grid);
        svg.text(
            px,
            y_bottom + 18.0,
            &points[i].label,
            TextStyle {
                size: 12.0,
                anchor: Anchor::End,
                color: AXIS,
                rotate: -45.0,
                ..Default::default()
            },
        );
    }

    svg.line(x0, y_bottom, x1, y_bottom, Stroke::solid(AXIS, 1.0));
    svg.line(x0, y_top, x0, y_bottom, Stroke::solid(AXIS, 1.0));

    let coords: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (x.map(i as f64), y.map(p.value)))
        .collect();

    if let (Some(first), Some(last)) = (coords.first(), coords.last()) {
        let mut area = Vec::with_capacity(coords.len() + 2);
        area.push((first.0, y.map(0.0)));
        area.extend(coords.iter().copied());
        area.push((last.0, y.map(0.0)));
        svg.polygon(&area, FILL, 0.35);
    }
    svg.polyline(&coords, Stroke::solid(LINE, 2.5));
    for (px, py) in &coords {
        svg.circle(*px, *py, 3.0, LINE);
    }

    if let (Some(p), Some((px, py))) = (series.latest(), coords.last()) {
        let note = format!(
            "最新：{} / {} {}",
            p.label,
            format_number(p.value, ds.decimals),
            ds.unit
        );
        svg.circle(*px, *py, 5.0, "#0d3b66");
        svg.text(
            px - 10.0,
            (py - 14.0).max(y_top + 12.0),
            &note,
            TextStyle {
                size: 14.0,
                anchor: Anchor::End,
                color: "#0d3b66",
                bold: true,
                ..Default::default()
            },
        );
    }

    svg.text(
        (x0 + x1) / 2.0,
        HEIGHT - 20.0,
        &ds.x_label,
        TextStyle {
            size: 14.0,
            anchor: Anchor::Middle,
            ..Default::default()
        },
    );
    svg.text(
        28.0,
        (y_top + y_bottom) / 2.0,
        &ds.y_label,
        TextStyle {
            size: 14.0,
            anchor: Anchor::Middle,
            rotate: -90.0,
            ..Default::default()
        },
    );
    svg.finish()
}
