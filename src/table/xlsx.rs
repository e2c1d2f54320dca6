// Minimal XLSX reader: first worksheet only, cell text/values as strings.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs::File,
    io::{Read, Seek},
    path::Path,
};
use zip::{result::ZipError, ZipArchive};

use super::Table;

static SHARED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<si>(.*?)</si>").unwrap());
static TEXT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<t(?:\s[^>]*)?>(.*?)</t>").unwrap());
static ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<row\b[^>]*?(?:/>|>(.*?)</row>)").unwrap());
static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").unwrap());
static VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<v>(.*?)</v>").unwrap());
static ATTR_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\br="([A-Z]+)\d+""#).unwrap());
static ATTR_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bt="([^"]+)""#).unwrap());

/// Read the first worksheet of the workbook at `path`; the first non-empty
/// row becomes the header.
pub fn read_first_sheet(path: &Path) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("{} is not an XLSX (zip) container", path.display()))?;

    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml),
        None => Vec::new(),
    };

    let sheet_name = first_sheet_name(&archive)
        .with_context(|| format!("no worksheet in {}", path.display()))?;
    let sheet = read_entry(&mut archive, &sheet_name)?
        .with_context(|| format!("missing {} in {}", sheet_name, path.display()))?;

    let mut rows = parse_sheet(&sheet, &shared)
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()));
    let Some(headers) = rows.next() else {
        bail!("worksheet {} is empty", sheet_name);
    };
    Ok(Table::new(headers, rows.collect()))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut buf = String::new();
            entry
                .read_to_string(&mut buf)
                .with_context(|| format!("reading {}", name))?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("accessing {}", name)),
    }
}

fn first_sheet_name<R: Read + Seek>(archive: &ZipArchive<R>) -> Option<String> {
    let mut sheets: Vec<&str> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml"))
        .filter(|n| !n[14..].contains('/'))
        .collect();
    // sheet1.xml, sheet2.xml, … sheet10.xml
    sheets.sort_by_key(|n| (n.len(), n.to_string()));
    sheets.first().map(|s| s.to_string())
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    SHARED_ITEM
        .captures_iter(xml)
        .map(|si| concat_text_runs(&si[1]))
        .collect()
}

fn concat_text_runs(fragment: &str) -> String {
    TEXT_RUN
        .captures_iter(fragment)
        .map(|t| unescape_xml(&t[1]))
        .collect()
}

fn parse_sheet(xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    for row in ROW.captures_iter(xml) {
        let Some(body) = row.get(1) else {
            out.push(Vec::new());
            continue;
        };
        let mut cells: Vec<String> = Vec::new();
        for (seq, cell) in CELL.captures_iter(body.as_str()).enumerate() {
            let attrs = &cell[1];
            let inner = cell.get(2).map(|m| m.as_str()).unwrap_or("");
            let col = ATTR_REF
                .captures(attrs)
                .map(|c| column_index(&c[1]))
                .unwrap_or(seq);
            let kind = ATTR_TYPE.captures(attrs).map(|c| c[1].to_string());
            let raw = VALUE.captures(inner).map(|v| unescape_xml(&v[1]));

            let value = match kind.as_deref() {
                Some("s") => raw
                    .and_then(|i| i.trim().parse::<usize>().ok())
                    .and_then(|i| shared.get(i).cloned())
                    .unwrap_or_default(),
                Some("inlineStr") => concat_text_runs(inner),
                _ => raw.unwrap_or_default(),
            };

            if cells.len() <= col {
                cells.resize(col + 1, String::new());
            }
            cells[col] = value;
        }
        out.push(cells);
    }
    out
}

/// "A" → 0, "Z" → 25, "AA" → 26.
fn column_index(letters: &str) -> usize {
    letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize)
        - 1
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=semi]),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_workbook(path: &Path, shared: &str, sheet: &str) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("xl/sharedStrings.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(shared.as_bytes()).unwrap();
        zip.start_file("xl/worksheets/sheet1.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(sheet.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn reads_shared_inline_and_numeric_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.xlsx");
        let shared = r#"<sst><si><t>年月</t></si><si><r><t>建物買賣</t></r><r><t xml:space="preserve">移轉棟數</t></r></si><si><t>全國</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>地區</t></is></c><c r="C1" t="s"><v>1</v></c></row>
<row r="2"/>
<row r="3"><c r="A3"><v>11305</v></c><c r="B3" t="s"><v>2</v></c><c r="C3"><v>28123</v></c></row>
<row r="4"><c r="A4"><v>11306</v></c><c r="C4"><v>27001</v></c></row>
</sheetData></worksheet>"#;
        write_workbook(&path, shared, sheet);

        let t = read_first_sheet(&path).unwrap();
        assert_eq!(t.headers, vec!["年月", "地區", "建物買賣移轉棟數"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0], vec!["11305", "全國", "28123"]);
        assert_eq!(t.rows[1], vec!["11306", "", "27001"]);
    }

    #[test]
    fn column_letters_map_to_indices() {
        assert_eq!(column_index("A"), 0);
        assert_eq!(column_index("Z"), 25);
        assert_eq!(column_index("AA"), 26);
        assert_eq!(column_index("AB"), 27);
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(unescape_xml("A&amp;B &lt;1&gt; &#33;&#x21;"), "A&B <1> !!");
        assert_eq!(unescape_xml("broken &amp"), "broken &amp");
    }
}
