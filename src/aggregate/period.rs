use chrono::{DateTime, Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Years below this are Minguo (ROC) years.
const MINGUO_OFFSET: i32 = 1911;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeriodKind {
    Quarter,
    Month,
}

/// A parsed period label: first day of the quarter/month plus a canonical
/// label (`2024Q4`, `2024-05`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    pub date: NaiveDate,
    pub label: String,
    pub kind: PeriodKind,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

static QUARTER: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^(\d{2,4})[Qq季](\d)$", r"^(\d{2,4})年第?(\d)季$"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static MONTH: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(\d{2,4})年(\d{1,2})月$",
        r"^(\d{2,4})[/-](\d{1,2})$",
        r"(?i)^(\d{2,4})M(\d{1,2})$",
        r"^(\d{4})(\d{2})$",
        r"^(\d{3})(\d{2})$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d"];

fn gregorian(year: i32) -> i32 {
    if year < MINGUO_OFFSET {
        year + MINGUO_OFFSET
    } else {
        year
    }
}

fn month_period(year: i32, month: u32) -> Option<Period> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Period {
        date,
        label: format!("{:04}-{:02}", year, month),
        kind: PeriodKind::Month,
    })
}

/// Parse a quarter or month label from a government export.
///
/// Minguo years (< 1911) are converted to Gregorian, so `97Q1` is 2008 Q1
/// and `11305` is May 2024. Returns `None` for anything unrecognised.
pub fn parse_period(raw: &str) -> Option<Period> {
    let text: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if text.is_empty() {
        return None;
    }

    for re in QUARTER.iter() {
        if let Some(caps) = re.captures(&text) {
            let year = gregorian(caps[1].parse().ok()?);
            let quarter: u32 = caps[2].parse().ok()?;
            if !(1..=4).contains(&quarter) {
                return None;
            }
            let date = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)?;
            return Some(Period {
                date,
                label: format!("{}Q{}", year, quarter),
                kind: PeriodKind::Quarter,
            });
        }
    }

    for re in MONTH.iter() {
        if let Some(caps) = re.captures(&text) {
            let year = gregorian(caps[1].parse().ok()?);
            let month: u32 = caps[2].parse().ok()?;
            return month_period(year, month);
        }
    }

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(&text)
                .ok()
                .map(|dt| dt.date_naive())
        })?;
    month_period(date.year(), date.month())
}
