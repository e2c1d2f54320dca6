//! Column-role detection over freshly read tables.
//!
//! Exports change their headers between releases (`年月` vs `期別`, `縣市` vs
//! `地區`), so roles are guessed from keywords unless the dataset supplies an
//! explicit [`ColumnMapping`].

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::config::ColumnMapping;
use crate::table::Table;

pub mod values;

pub use values::{clean_str, normalize_region, parse_value};

/// Period header keywords, highest priority first.
pub const PERIOD_KEYWORDS: &[&str] = &[
    "期別", "年月", "季別", "月份", "日期", "時間", "季", "年", "month", "date", "quarter", "year",
    "period",
];

pub const REGION_KEYWORDS: &[&str] = &["縣市", "區域", "城市", "地區", "region", "city", "area"];

/// Column indices of the three roles the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRoles {
    pub period: usize,
    pub region: Option<usize>,
    pub value: usize,
}

/// Position of the earliest keyword `name` contains; lower is better.
fn keyword_rank<S: AsRef<str>>(name: &str, keywords: &[S]) -> Option<usize> {
    let lower = name.to_lowercase();
    keywords
        .iter()
        .position(|k| lower.contains(&k.as_ref().to_lowercase()))
}

fn best_match<S: AsRef<str>>(headers: &[String], keywords: &[S], exclude: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (idx, name) in headers.iter().enumerate() {
        if exclude.contains(&idx) {
            continue;
        }
        if let Some(rank) = keyword_rank(name, keywords) {
            // strict `<` keeps the first column on ties
            if best.map_or(true, |(_, r)| rank < r) {
                best = Some((idx, rank));
            }
        }
    }
    best.map(|(idx, _)| idx)
}

pub fn detect_period_column(headers: &[String]) -> usize {
    best_match(headers, PERIOD_KEYWORDS, &[]).unwrap_or(0)
}

pub fn detect_region_column(headers: &[String], period: usize) -> Option<usize> {
    best_match(headers, REGION_KEYWORDS, &[period])
}

/// Prefer a header containing one of `priority`; otherwise the column with
/// the most numeric cells.
pub fn detect_value_column(
    table: &Table,
    period: usize,
    region: Option<usize>,
    priority: &[String],
) -> Result<usize> {
    let mut exclude = vec![period];
    exclude.extend(region);

    if let Some(idx) = best_match(&table.headers, priority, &exclude) {
        return Ok(idx);
    }

    let mut best: Option<(usize, usize)> = None;
    for idx in (0..table.headers.len()).filter(|i| !exclude.contains(i)) {
        let valid = table
            .column(idx)
            .filter(|c| parse_value(c).is_some())
            .count();
        if best.map_or(true, |(_, v)| valid > v) {
            best = Some((idx, valid));
        }
    }
    match best {
        Some((idx, _)) => Ok(idx),
        None => bail!("no usable value column among {:?}", table.headers),
    }
}

fn named_column(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("configured column `{}` not in {:?}", name, headers))
}

/// Period and region columns, the (period, region) key of a row. An explicit
/// mapping wins over the keyword heuristics.
pub fn key_columns(
    headers: &[String],
    mapping: Option<&ColumnMapping>,
) -> Result<(usize, Option<usize>)> {
    match mapping {
        Some(m) => Ok((
            named_column(headers, &m.period)?,
            m.region
                .as_deref()
                .map(|r| named_column(headers, r))
                .transpose()?,
        )),
        None => {
            let period = detect_period_column(headers);
            Ok((period, detect_region_column(headers, period)))
        }
    }
}

/// Resolve roles from an explicit mapping when given, keyword heuristics otherwise.
pub fn detect_roles(
    table: &Table,
    value_keywords: &[String],
    mapping: Option<&ColumnMapping>,
) -> Result<ColumnRoles> {
    let (period, region) = key_columns(&table.headers, mapping)?;
    let value = match mapping {
        Some(m) => named_column(&table.headers, &m.value)?,
        None => detect_value_column(table, period, region, value_keywords)?,
    };
    let roles = ColumnRoles {
        period,
        region,
        value,
    };
    debug!(
        period = %table.headers[roles.period],
        region = ?roles.region.map(|i| &table.headers[i]),
        value = %table.headers[roles.value],
        "column roles"
    );
    Ok(roles)
}
