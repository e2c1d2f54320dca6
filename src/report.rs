// src/report.rs
//
// Markdown monitor reports.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::aggregate::TimeSeries;
use crate::config::DatasetConfig;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S CST";
const MAX_ERROR_LEN: usize = 300;

/// Asia/Taipei has no DST, so a fixed +08:00 is exact.
pub fn taipei() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("+08:00 is a valid offset")
}

pub fn taipei_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&taipei())
}

/// `YYYY-MM-DD HH:MM:SS CST`
pub fn format_timestamp(at: &DateTime<FixedOffset>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Fixed decimals with thousands separators; never prints `-0`.
pub fn format_number(v: f64, decimals: usize) -> String {
    let s = format!("{:.*}", decimals, v.abs());
    let (int, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s.as_str(), None),
    };
    let mut out = String::with_capacity(s.len() + int.len() / 3 + 1);
    if v < 0.0 && s.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        out.push('-');
    }
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if let Some(f) = frac {
        out.push('.');
        out.push_str(f);
    }
    out
}

/// Percentage change, `None` when there is no usable base.
pub fn change_ratio(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some((current - previous) / previous * 100.0)
    }
}

/// `+1,234 棟 (+5.67%)`, or `資料不足` without a comparison point.
pub fn format_change(current: f64, previous: Option<f64>, unit: &str, decimals: usize) -> String {
    let Some(previous) = previous else {
        return "資料不足".to_string();
    };
    let delta = format_number(current - previous, decimals);
    let sign = if delta.starts_with('-') { "" } else { "+" };
    let mut out = format!("{}{} {}", sign, delta, unit);
    if let Some(ratio) = change_ratio(current, previous) {
        let ratio = format!("{:.2}", ratio);
        let sign = if ratio.starts_with('-') { "" } else { "+" };
        let _ = write!(out, " ({}{}%)", sign, ratio);
    }
    out
}

/// First non-empty line, at most 300 characters.
pub fn summarize_error(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "未知錯誤".to_string();
    }
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(text)
        .chars()
        .take(MAX_ERROR_LEN)
        .collect()
}

/// `path` relative to the working directory when it lies beneath it.
pub fn display_path(path: &Path) -> String {
    let rel: PathBuf = std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf());
    rel.display().to_string()
}

/// Everything a report needs besides the numbers.
pub struct ReportContext<'a> {
    pub dataset: &'a DatasetConfig,
    pub csv_path: &'a Path,
    pub svg_path: &'a Path,
    pub source_url: &'a str,
    pub generated_at: DateTime<FixedOffset>,
}

fn region_table(out: &mut String, ds: &DatasetConfig, regions: &[(String, TimeSeries)]) {
    out.push_str("\n## 各縣市最新數據\n\n");
    out.push_str("| 縣市 | 最新期別 | 數值 | 與前一期差異 | 與去年同期差異 |\n");
    out.push_str("| --- | --- | ---: | ---: | ---: |\n");
    for (region, series) in regions {
        let Some(latest) = series.latest() else {
            let _ = writeln!(out, "| {} | - | 資料不足 | - | - |", region);
            continue;
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} {} | {} | {} |",
            region,
            latest.label,
            format_number(latest.value, ds.decimals),
            ds.unit,
            format_change(
                latest.value,
                series.previous().map(|p| p.value),
                &ds.unit,
                ds.decimals
            ),
            format_change(
                latest.value,
                series.same_period_last_year().map(|p| p.value),
                &ds.unit,
                ds.decimals
            ),
        );
    }
}

/// Monitor report for a dataset with data.
pub fn monitor_report(
    ctx: &ReportContext<'_>,
    series: &TimeSeries,
    regions: Option<&[(String, TimeSeries)]>,
) -> String {
    let ds = ctx.dataset;
    let mut out = String::new();
    let _ = writeln!(out, "# {}監控\n", ds.title);
    let _ = writeln!(out, "- 更新時間：{}", format_timestamp(&ctx.generated_at));

    match series.latest() {
        Some(latest) => {
            let _ = writeln!(out, "- 最新期別：{}", latest.label);
            let _ = writeln!(
                out,
                "- 最新數值：{} {}",
                format_number(latest.value, ds.decimals),
                ds.unit
            );
            let _ = writeln!(
                out,
                "- 與前一期差異：{}",
                format_change(
                    latest.value,
                    series.previous().map(|p| p.value),
                    &ds.unit,
                    ds.decimals
                )
            );
            let _ = writeln!(
                out,
                "- 與去年同期差異：{}",
                format_change(
                    latest.value,
                    series.same_period_last_year().map(|p| p.value),
                    &ds.unit,
                    ds.decimals
                )
            );
        }
        None => out.push_str("- 最新期別：資料不足\n"),
    }

    if let Some(regions) = regions {
        region_table(&mut out, ds, regions);
    }

    out.push_str("\n## 檔案位置\n");
    let _ = writeln!(out, "- CSV：`{}`", display_path(ctx.csv_path));
    let _ = writeln!(out, "- SVG：`{}`", display_path(ctx.svg_path));
    out.push_str("\n## 資料來源\n");
    let _ = writeln!(out, "- 內政部不動產資訊平台：{}", ctx.source_url);
    out
}

/// Report written when neither a download nor stored data was available.
pub fn unavailable_report(
    ds: &DatasetConfig,
    generated_at: &DateTime<FixedOffset>,
    error: &str,
    source_url: &str,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}監控\n", ds.title);
    let _ = writeln!(out, "- 更新時間：{}", format_timestamp(generated_at));
    out.push_str("- 狀態：更新失敗（使用既有資料也不可用）\n");
    let _ = writeln!(out, "- 錯誤訊息：{}", error);
    out.push_str("\n## 資料來源\n");
    let _ = writeln!(out, "- 內政部不動產資訊平台：{}", source_url);
    out
}

pub fn write_report(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}
