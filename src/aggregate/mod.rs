//! Period parsing and time-series derivation.

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::Aggregate;
use crate::normalize::{clean_str, normalize_region, parse_value, ColumnRoles};
use crate::table::Table;

pub mod period;

pub use period::{parse_period, Period, PeriodKind};

/// Region labels meaning "all of Taiwan", in normalized (`台`) form.
pub const NATIONWIDE_ALIASES: &[&str] = &["全國", "全台", "全台灣", "台灣", "台閩地區"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub label: String,
    pub value: f64,
}

/// Points strictly increasing by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeries {
    points: Vec<SeriesPoint>,
}

impl TimeSeries {
    /// Sum observations sharing a date; the first label seen for a date is kept.
    pub fn from_observations<I>(obs: I) -> Self
    where
        I: IntoIterator<Item = (Period, f64)>,
    {
        let mut by_date: BTreeMap<NaiveDate, SeriesPoint> = BTreeMap::new();
        for (period, value) in obs {
            by_date
                .entry(period.date)
                .and_modify(|p| p.value += value)
                .or_insert(SeriesPoint {
                    date: period.date,
                    label: period.label,
                    value,
                });
        }
        Self {
            points: by_date.into_values().collect(),
        }
    }

    /// Sort by date; of several points on one date only the last is kept.
    pub fn from_points(mut points: Vec<SeriesPoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.reverse();
        points.dedup_by_key(|p| p.date);
        points.reverse();
        Self { points }
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    pub fn previous(&self) -> Option<&SeriesPoint> {
        self.points.iter().rev().nth(1)
    }

    /// The point one year before the latest, same month.
    pub fn same_period_last_year(&self) -> Option<&SeriesPoint> {
        let latest = self.latest()?;
        self.points.iter().rev().find(|p| {
            p.date.year() == latest.date.year() - 1 && p.date.month() == latest.date.month()
        })
    }

    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.points.iter().map(|p| p.value).fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Running sum and count, for sum/mean combination.
#[derive(Default, Clone, Copy)]
struct Acc {
    sum: f64,
    n: usize,
}

impl Acc {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.n += 1;
    }

    fn get(&self, how: Aggregate) -> f64 {
        match how {
            Aggregate::Sum => self.sum,
            Aggregate::Mean => self.sum / self.n as f64,
        }
    }
}

fn parsed(label: &str, value: f64, dropped: &mut usize) -> Option<(Period, f64)> {
    match parse_period(label) {
        Some(p) => Some((p, value)),
        None => {
            *dropped += 1;
            None
        }
    }
}

/// Build the nationwide series.
///
/// Rows whose region is a nationwide alias are used as-is when present;
/// otherwise every region is combined per period with `how`. Rows with no
/// numeric value or an unparseable period are dropped.
pub fn nationwide_series(table: &Table, roles: &ColumnRoles, how: Aggregate) -> Result<TimeSeries> {
    let rows: Vec<(&str, Option<String>, f64)> = table
        .rows
        .iter()
        .filter_map(|r| {
            let value = parse_value(&r[roles.value])?;
            let region = roles.region.map(|i| normalize_region(&r[i]));
            Some((clean_str(&r[roles.period]), region, value))
        })
        .collect();

    let mut dropped = 0usize;
    let obs: Vec<(Period, f64)> = if roles.region.is_some() {
        let nationwide: Vec<_> = rows
            .iter()
            .filter(|(_, region, _)| {
                region
                    .as_deref()
                    .is_some_and(|r| NATIONWIDE_ALIASES.contains(&r))
            })
            .collect();

        if !nationwide.is_empty() {
            debug!(rows = nationwide.len(), "using explicit nationwide rows");
            nationwide
                .into_iter()
                .filter_map(|(label, _, v)| parsed(label, *v, &mut dropped))
                .collect()
        } else {
            debug!(how = ?how, "synthesizing nationwide series from regions");
            let mut per_period: Vec<(&str, Acc)> = Vec::new();
            let mut index: HashMap<&str, usize> = HashMap::new();
            for (label, _, v) in &rows {
                let i = *index.entry(*label).or_insert_with(|| {
                    per_period.push((*label, Acc::default()));
                    per_period.len() - 1
                });
                per_period[i].1.push(*v);
            }
            per_period
                .into_iter()
                .filter_map(|(label, acc)| parsed(label, acc.get(how), &mut dropped))
                .collect()
        }
    } else {
        rows.iter()
            .filter_map(|(label, _, v)| parsed(label, *v, &mut dropped))
            .collect()
    };

    if dropped > 0 {
        debug!(dropped, "dropped rows with unparseable periods");
    }
    let series = TimeSeries::from_observations(obs);
    if series.is_empty() {
        bail!("no usable nationwide observations after processing");
    }
    Ok(series)
}

/// One series per requested region, in the requested order. Duplicate
/// (region, period) cells are averaged; regions without data are omitted.
pub fn region_series(
    table: &Table,
    roles: &ColumnRoles,
    regions: &[String],
) -> Result<Vec<(String, TimeSeries)>> {
    let Some(region_col) = roles.region else {
        bail!("no region column to pivot on");
    };

    let wanted: Vec<String> = regions.iter().map(|r| normalize_region(r)).collect();
    let mut cells: Vec<BTreeMap<NaiveDate, (String, Acc)>> = vec![BTreeMap::new(); regions.len()];

    for row in &table.rows {
        let region = normalize_region(&row[region_col]);
        let Some(slot) = wanted.iter().position(|w| *w == region) else {
            continue;
        };
        let (Some(value), Some(period)) =
            (parse_value(&row[roles.value]), parse_period(&row[roles.period]))
        else {
            continue;
        };
        cells[slot]
            .entry(period.date)
            .or_insert_with(|| (period.label, Acc::default()))
            .1
            .push(value);
    }

    let out: Vec<(String, TimeSeries)> = regions
        .iter()
        .zip(cells)
        .filter(|(_, c)| !c.is_empty())
        .map(|(name, c)| {
            let points = c
                .into_iter()
                .map(|(date, (label, acc))| SeriesPoint {
                    date,
                    label,
                    value: acc.get(Aggregate::Mean),
                })
                .collect();
            (name.clone(), TimeSeries { points })
        })
        .collect();

    if out.is_empty() {
        bail!("none of the regions {:?} have data", regions);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&str, &str, &str)]) -> Table {
        Table::new(
            vec!["季別".into(), "縣市別".into(), "數值".into()],
            rows.iter()
                .map(|(p, r, v)| vec![p.to_string(), r.to_string(), v.to_string()])
                .collect(),
        )
    }

    const ROLES: ColumnRoles = ColumnRoles {
        period: 0,
        region: Some(1),
        value: 2,
    };

    #[test]
    fn sums_regions_without_nationwide_row() {
        let t = table(&[("112Q1", "台北市", "120"), ("112Q1", "新北市", "80")]);
        let s = nationwide_series(&t, &ROLES, Aggregate::Sum).unwrap();
        assert_eq!(s.len(), 1);
        let p = s.latest().unwrap();
        assert_eq!(p.label, "2023Q1");
        assert_eq!(p.value, 200.0);
    }

    #[test]
    fn explicit_nationwide_rows_win() {
        let t = table(&[
            ("11301", "臺北市", "1,000"),
            ("11301", "全國", "25,000"),
            ("11302", "臺灣", "24,000"),
            ("11302", "新北市", "2,000"),
        ]);
        let s = nationwide_series(&t, &ROLES, Aggregate::Sum).unwrap();
        let values: Vec<f64> = s.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![25000.0, 24000.0]);
    }

    #[test]
    fn mean_combination_and_sorting() {
        let t = table(&[
            ("113Q2", "臺北市", "0.20%"),
            ("113Q1", "臺北市", "0.10%"),
            ("113Q1", "高雄市", "0.30%"),
            ("113Q2", "高雄市", "0.40%"),
            ("合計", "高雄市", "9"),
            ("113Q3", "高雄市", "-"),
        ]);
        let s = nationwide_series(&t, &ROLES, Aggregate::Mean).unwrap();
        let labels: Vec<&str> = s.points().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["2024Q1", "2024Q2"]);
        assert!((s.points()[0].value - 0.2).abs() < 1e-9);
        assert!((s.points()[1].value - 0.3).abs() < 1e-9);
    }

    #[test]
    fn no_region_column_uses_all_rows() {
        let t = Table::new(
            vec!["年月".into(), "棟數".into()],
            vec![
                vec!["11305".into(), "28,000".into()],
                vec!["11304".into(), "27,000".into()],
            ],
        );
        let roles = ColumnRoles {
            period: 0,
            region: None,
            value: 1,
        };
        let s = nationwide_series(&t, &roles, Aggregate::Sum).unwrap();
        assert_eq!(s.points()[0].label, "2024-04");
        assert_eq!(s.latest().unwrap().value, 28000.0);
    }

    #[test]
    fn empty_result_is_an_error() {
        let t = table(&[("合計", "全國", "1")]);
        assert!(nationwide_series(&t, &ROLES, Aggregate::Sum).is_err());
    }

    #[test]
    fn year_over_year_lookup() {
        let t = table(&[
            ("11204", "全國", "10"),
            ("11205", "全國", "11"),
            ("11304", "全國", "12"),
            ("11305", "全國", "13"),
        ]);
        let s = nationwide_series(&t, &ROLES, Aggregate::Sum).unwrap();
        assert_eq!(s.previous().unwrap().label, "2024-04");
        assert_eq!(s.same_period_last_year().unwrap().label, "2023-05");
        assert_eq!(s.min_max(), Some((10.0, 13.0)));
    }

    #[test]
    fn pivots_requested_regions_in_order() {
        let t = table(&[
            ("113Q1", "台北市", "0.10%"),
            ("113Q1", "臺北市", "0.20%"),
            ("113Q1", "高雄市", "0.30%"),
            ("112Q4", "高雄市", "0.25%"),
            ("113Q1", "花蓮縣", "0.90%"),
        ]);
        let regions = vec!["高雄市".to_string(), "臺北市".to_string(), "臺中市".to_string()];
        let out = region_series(&t, &ROLES, &regions).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, "高雄市");
        assert_eq!(out[0].1.len(), 2);
        assert_eq!(out[1].0, "臺北市");
        assert!((out[1].1.latest().unwrap().value - 0.15).abs() < 1e-9);
    }
}
