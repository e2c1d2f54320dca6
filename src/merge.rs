// src/merge.rs

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

use crate::config::ColumnMapping;
use crate::normalize::{clean_str, key_columns};
use crate::table::Table;

/// How the stored table was produced from the new download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Nothing was stored before.
    Created,
    /// Column sets differed, so the new table replaced the old one.
    Replaced,
    /// Rows were unioned; `superseded` old or new rows lost to a later duplicate.
    Merged { superseded: usize },
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub table: Table,
    pub mode: MergeMode,
}

fn has_duplicates(headers: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(headers.len());
    !headers.iter().all(|h| seen.insert(h.as_str()))
}

/// For each of `old`'s columns, the position of the same column in `new`.
/// Identical header rows align by position, so repeated names are fine there;
/// otherwise names must be unique and the sets equal.
fn alignment(old: &[String], new: &[String]) -> Option<Vec<usize>> {
    if old == new {
        return Some((0..old.len()).collect());
    }
    if old.len() != new.len() || has_duplicates(old) || has_duplicates(new) {
        return None;
    }
    old.iter()
        .map(|h| new.iter().position(|n| n == h))
        .collect()
}

/// Union `new` into `old`, de-duplicating on (period, region). The key
/// columns come from `mapping` when given, else from the header heuristics.
///
/// The later row wins on a key conflict and survives at the position of its
/// last occurrence; no row is dropped unless a later row shares its key.
#[instrument(level = "debug", skip_all, fields(new_rows = new.len()))]
pub fn merge_tables(
    old: Option<Table>,
    new: Table,
    mapping: Option<&ColumnMapping>,
) -> Result<MergeOutcome> {
    let Some(old) = old else {
        return Ok(MergeOutcome {
            table: new,
            mode: MergeMode::Created,
        });
    };

    let Some(order) = alignment(&old.headers, &new.headers) else {
        info!(
            old = ?old.headers,
            new = ?new.headers,
            "column set changed; replacing stored table"
        );
        return Ok(MergeOutcome {
            table: new,
            mode: MergeMode::Replaced,
        });
    };

    let headers = old.headers;
    let (period, region) = key_columns(&headers, mapping)?;

    let mut rows = old.rows;
    rows.extend(
        new.rows
            .into_iter()
            .map(|row| order.iter().map(|&i| row[i].clone()).collect::<Vec<_>>()),
    );

    let key = |row: &Vec<String>| -> (String, Option<String>) {
        (
            clean_str(&row[period]).to_string(),
            region.map(|i| clean_str(&row[i]).to_string()),
        )
    };

    let mut last: HashMap<(String, Option<String>), usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        last.insert(key(row), idx);
    }

    let total = rows.len();
    let kept: Vec<Vec<String>> = rows
        .into_iter()
        .enumerate()
        .filter(|(idx, row)| last.get(&key(row)) == Some(idx))
        .map(|(_, row)| row)
        .collect();
    let superseded = total - kept.len();

    Ok(MergeOutcome {
        table: Table {
            headers,
            rows: kept,
        },
        mode: MergeMode::Merged { superseded },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn first_run_stores_new_table() {
        let new = t(&["季別", "縣市別", "違約率"], &[&["113Q1", "臺北市", "0.1%"]]);
        let out = merge_tables(None, new.clone(), None).unwrap();
        assert_eq!(out.mode, MergeMode::Created);
        assert_eq!(out.table, new);
    }

    #[test]
    fn schema_change_replaces() {
        let old = t(&["季別", "違約率"], &[&["112Q4", "0.1%"]]);
        let new = t(&["季別", "縣市別", "違約率"], &[&["113Q1", "臺北市", "0.2%"]]);
        let out = merge_tables(Some(old), new.clone(), None).unwrap();
        assert_eq!(out.mode, MergeMode::Replaced);
        assert_eq!(out.table, new);
    }

    #[test]
    fn changed_value_replaces_without_duplicating() {
        let old = t(
            &["季別", "縣市別", "違約率"],
            &[
                &["112Q4", "臺北市", "0.10%"],
                &["113Q1", "臺北市", "0.11%"],
                &["113Q1", "新北市", "0.20%"],
            ],
        );
        let new = t(
            &["季別", "縣市別", "違約率"],
            &[&["113Q1", "臺北市", "0.15%"], &["113Q2", "臺北市", "0.12%"]],
        );
        let out = merge_tables(Some(old), new, None).unwrap();
        assert_eq!(out.mode, MergeMode::Merged { superseded: 1 });
        assert_eq!(
            out.table.rows,
            vec![
                vec!["112Q4", "臺北市", "0.10%"],
                vec!["113Q1", "新北市", "0.20%"],
                vec!["113Q1", "臺北市", "0.15%"],
                vec!["113Q2", "臺北市", "0.12%"],
            ]
        );
    }

    #[test]
    fn reordered_columns_are_aligned() {
        let old = t(&["年月", "棟數"], &[&["11301", "100"]]);
        let new = t(&["棟數", "年月"], &[&["120", "11301"], &["130", "11302"]]);
        let out = merge_tables(Some(old), new, None).unwrap();
        assert_eq!(out.table.headers, vec!["年月", "棟數"]);
        assert_eq!(
            out.table.rows,
            vec![vec!["11301", "120"], vec!["11302", "130"]]
        );
    }

    #[test]
    fn only_duplicate_keys_are_lost() {
        let headers = ["年月", "縣市", "棟數"];
        let old_rows: Vec<[String; 3]> = (1..=12)
            .map(|m| [format!("112{:02}", m), "全國".into(), format!("{}", m * 10)])
            .collect();
        let new_rows: Vec<[String; 3]> = (7..=18)
            .map(|m| {
                let (y, mm) = if m > 12 { (113, m - 12) } else { (112, m) };
                [format!("{}{:02}", y, mm), "全國".into(), format!("{}", m * 11)]
            })
            .collect();
        let to_table = |rows: &[[String; 3]]| {
            Table::new(
                headers.iter().map(|s| s.to_string()).collect(),
                rows.iter().map(|r| r.to_vec()).collect(),
            )
        };

        let out = merge_tables(Some(to_table(&old_rows)), to_table(&new_rows), None).unwrap();
        // 12 old + 12 new, 6 overlapping keys
        assert_eq!(out.table.len(), 18);
        assert_eq!(out.mode, MergeMode::Merged { superseded: 6 });
        for row in &new_rows {
            assert!(out.table.rows.iter().any(|r| r[..] == row[..]));
        }
        for row in old_rows.iter().take(6) {
            assert!(out.table.rows.iter().any(|r| r[..] == row[..]));
        }
    }

    #[test]
    fn configured_key_columns_are_honoured() {
        // headers the heuristics would misread: no period/region keywords
        let mapping = ColumnMapping {
            period: "when".into(),
            region: Some("loc".into()),
            value: "v".into(),
        };
        let first = t(&["loc", "when", "v"], &[&["A", "11301", "1"], &["B", "11301", "2"]]);
        let second = t(&["loc", "when", "v"], &[&["A", "11302", "3"], &["B", "11302", "4"]]);
        let out = merge_tables(Some(first), second, Some(&mapping)).unwrap();
        assert_eq!(out.mode, MergeMode::Merged { superseded: 0 });
        assert_eq!(out.table.len(), 4);

        let again = t(&["loc", "when", "v"], &[&["B", "11302", "5"]]);
        let out = merge_tables(Some(out.table), again, Some(&mapping)).unwrap();
        assert_eq!(out.table.len(), 4);
        assert_eq!(out.table.rows[3], vec!["B", "11302", "5"]);
    }

    #[test]
    fn mapping_naming_missing_column_fails() {
        let mapping = ColumnMapping {
            period: "period".into(),
            region: None,
            value: "v".into(),
        };
        let old = t(&["when", "v"], &[&["11301", "1"]]);
        let new = t(&["when", "v"], &[&["11302", "2"]]);
        assert!(merge_tables(Some(old), new, Some(&mapping)).is_err());
    }

    #[test]
    fn repeated_headers_align_by_position() {
        let old = t(&["年月", "棟數", "棟數"], &[&["11301", "1", "10"]]);
        let new = t(&["年月", "棟數", "棟數"], &[&["11302", "2", "20"]]);
        let out = merge_tables(Some(old), new, None).unwrap();
        assert_eq!(out.mode, MergeMode::Merged { superseded: 0 });
        assert_eq!(out.table.rows[1], vec!["11302", "2", "20"]);
    }

    #[test]
    fn reordered_repeated_headers_replace() {
        let old = t(&["年月", "棟數", "棟數", "備註"], &[&["11301", "1", "10", "x"]]);
        let new = t(&["棟數", "年月", "棟數", "備註"], &[&["2", "11302", "20", "y"]]);
        let out = merge_tables(Some(old), new.clone(), None).unwrap();
        assert_eq!(out.mode, MergeMode::Replaced);
        assert_eq!(out.table, new);
    }
}
