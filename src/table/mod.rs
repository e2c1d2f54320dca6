// src/table/mod.rs

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::{debug, warn};

pub mod decode;
pub mod xlsx;

pub use decode::{decode_text, DecodeError};

/// A downloaded or stored dataset: header names plus raw string cells.
/// Every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table, trimming header names, padding short rows and dropping
    /// rows with no content at all.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let width = headers.len();
        let rows = rows
            .into_iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .map(|mut r| {
                if r.len() > width {
                    debug!(extra = r.len() - width, "truncating ragged row");
                }
                r.resize(width, String::new());
                r
            })
            .collect();
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// All cells of column `idx`, top to bottom.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |r| r[idx].as_str())
    }
}

/// Parse CSV text whose first record is the header row.
pub fn parse_csv_text(text: &str) -> Result<Table> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut records = rdr.records();
    let headers: Vec<String> = match records.next() {
        Some(rec) => rec
            .context("CSV parse error in header row")?
            .iter()
            .map(str::to_string)
            .collect(),
        None => bail!("CSV input is empty"),
    };

    let mut rows = Vec::new();
    for (idx, rec) in records.enumerate() {
        let rec = rec.with_context(|| format!("CSV parse error at record {}", idx + 1))?;
        rows.push(rec.iter().map(str::to_string).collect());
    }
    Ok(Table::new(headers, rows))
}

fn read_csv(path: &Path) -> Result<Table> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (text, encoding) =
        decode_text(&bytes).with_context(|| format!("decoding {}", path.display()))?;
    debug!(path = %path.display(), encoding, "decoded table text");
    parse_csv_text(&text)
}

/// Read a tabular data file, choosing the parser by extension.
pub fn read_table(path: &Path) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "csv" | "txt" => read_csv(path),
        "xlsx" => xlsx::read_first_sheet(path),
        "xls" => bail!(
            "legacy .xls workbooks are not supported: {}",
            path.display()
        ),
        _ => {
            let csv_err = match read_csv(path) {
                Ok(t) => return Ok(t),
                Err(e) => e,
            };
            warn!(path = %path.display(), error = %csv_err, "not CSV, trying XLSX");
            xlsx::read_first_sheet(path)
                .map_err(|_| anyhow!("cannot parse data file {}: {}", path.display(), csv_err))
        }
    }
}

/// Replace `path` with `table` as UTF-8 CSV (with BOM, so spreadsheet tools
/// pick the right encoding). Written to a sibling temp file then renamed.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(b"\xEF\xBB\xBF")?;
        let mut wtr = WriterBuilder::new().from_writer(out);
        wtr.write_record(&table.headers)?;
        for row in &table.rows {
            wtr.write_record(row)?;
        }
        wtr.into_inner()
            .map_err(|e| anyhow!("flushing {}: {}", tmp.display(), e.error()))?
            .flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} → {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_ragged_rows_and_drops_blank_lines() {
        let text = "\u{feff}期別 , 縣市別,棟數\n11301,臺北市,\"2,345\"\n,,\n11302,新北市\n";
        let t = parse_csv_text(text).unwrap();
        assert_eq!(t.headers, vec!["期別", "縣市別", "棟數"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows[0][2], "2,345");
        assert_eq!(t.rows[1], vec!["11302", "新北市", ""]);
    }

    #[test]
    fn write_then_read_keeps_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let table = Table::new(
            vec!["季別".into(), "違約率".into()],
            vec![vec!["113Q4".into(), "0.12%".into()]],
        );
        write_csv(&table, &path).unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(raw.starts_with(b"\xEF\xBB\xBF"));
        assert_eq!(read_table(&path).unwrap(), table);
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn big5_file_is_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        let (bytes, _, _) = encoding_rs::BIG5.encode("年月,棟數\n11305,1000\n");
        fs::write(&path, &bytes).unwrap();
        let t = read_table(&path).unwrap();
        assert_eq!(t.headers, vec!["年月", "棟數"]);
        assert_eq!(t.rows, vec![vec!["11305".to_string(), "1000".to_string()]]);
    }

    #[test]
    fn legacy_xls_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.xls");
        fs::write(&path, b"\xD0\xCF\x11\xE0").unwrap();
        let err = read_table(&path).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
