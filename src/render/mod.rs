//! SVG charts, written as text.

use anyhow::{Context, Result};
use std::{fs, path::Path};
use tracing::info;

use crate::aggregate::TimeSeries;
use crate::config::{ChartConfig, DatasetConfig};

pub mod panels;
pub mod scale;
pub mod svg;
pub mod trend;

pub use panels::render_region_panels;
pub use trend::render_trend;

use svg::{Anchor, Svg, TextStyle};

/// What a dataset's chart is drawn from.
pub enum ChartData<'a> {
    Trend(&'a TimeSeries),
    Regions(&'a [(String, TimeSeries)]),
}

/// Draw the chart configured for `ds`.
pub fn render_chart(ds: &DatasetConfig, data: ChartData<'_>) -> String {
    match (&ds.chart, data) {
        (ChartConfig::RegionPanels { threshold, y_max, .. }, ChartData::Regions(panels)) => {
            render_region_panels(panels, ds, threshold.as_ref(), *y_max)
        }
        (_, ChartData::Trend(series)) => render_trend(series, ds),
        (ChartConfig::Trend, ChartData::Regions(panels)) => {
            // A trend over the first region is the closest thing we can draw.
            let empty = TimeSeries::default();
            let series = panels.first().map(|(_, s)| s).unwrap_or(&empty);
            render_trend(series, ds)
        }
    }
}

/// Placeholder shown when no data could be obtained at all.
pub fn render_unavailable(title: &str, error: &str) -> String {
    let (w, h) = (1200.0, 400.0);
    let mut svg = Svg::new(w, h);
    svg.text(
        w / 2.0,
        120.0,
        title,
        TextStyle {
            size: 26.0,
            anchor: Anchor::Middle,
            bold: true,
            color: "#222222",
            ..Default::default()
        },
    );
    svg.text(
        w / 2.0,
        190.0,
        "目前無法取得資料，已保留上次可用輸出或等待下次更新。",
        TextStyle {
            size: 18.0,
            anchor: Anchor::Middle,
            ..Default::default()
        },
    );
    svg.text(
        w / 2.0,
        250.0,
        &format!("錯誤訊息: {}", error),
        TextStyle {
            size: 14.0,
            anchor: Anchor::Middle,
            color: "#b22222",
            ..Default::default()
        },
    );
    svg.finish()
}

/// Write via a sibling temp file and rename, so readers never see half a chart.
pub fn write_svg(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("svg.tmp");
    fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
    info!(path = %path.display(), bytes = content.len(), "chart written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    #[test]
    fn unavailable_chart_escapes_error() {
        let out = render_unavailable("全台建物買賣移轉棟數", "GET <url> failed & gave up");
        assert!(out.contains("全台建物買賣移轉棟數"));
        assert!(out.contains("GET &lt;url&gt; failed &amp; gave up"));
    }

    #[test]
    fn chart_kind_follows_config() {
        let cfg = Config::default();
        let rate = cfg.dataset("default-rate").unwrap();
        let panels = vec![("臺北市".to_string(), TimeSeries::default())];
        let out = render_chart(rate, ChartData::Regions(&panels));
        assert!(out.contains("無資料"));

        let count = cfg.dataset("transfer-count").unwrap();
        let out = render_chart(count, ChartData::Trend(&TimeSeries::default()));
        assert!(out.contains(&count.title));
    }

    #[test]
    fn write_is_atomic_and_creates_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("svg").join("chart.svg");
        write_svg(&path, "<svg/>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<svg/>");
        assert!(!path.with_extension("svg.tmp").exists());
    }
}
