// src/readme.rs
//
// README timestamp upkeep, treating the file as lines grouped under headings.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fs, ops::Range, path::Path};
use tracing::{debug, info};

static STAMP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Update time: \d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} CST$")
        .expect("timestamp pattern should compile")
});

/// Marker line the chart and timestamp go above when the section has no chart yet.
const CONTENT_MARKER: &str = "監控內容：";

pub fn stamp_line(at: &DateTime<FixedOffset>) -> String {
    at.format("Update time: %Y-%m-%d %H:%M:%S CST").to_string()
}

/// Level of a Markdown ATX heading (`### x` is 3).
fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with(' ') {
        Some(hashes)
    } else {
        None
    }
}

/// Lines of the section headed by `header`, heading line included. The
/// section ends at the next heading of the same or a higher level.
fn section_range(lines: &[String], header: &str) -> Option<Range<usize>> {
    let start = lines.iter().position(|l| l.trim() == header)?;
    let level = heading_level(lines[start].trim_start()).unwrap_or(6);
    let end = lines[start + 1..]
        .iter()
        .position(|l| heading_level(l).is_some_and(|lv| lv <= level))
        .map_or(lines.len(), |off| start + 1 + off);
    Some(start..end)
}

fn collapse_blank_runs(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut previous_blank = false;
    for line in lines {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        out.push(line);
    }
    out
}

/// Where and what to stamp.
#[derive(Debug, Clone)]
pub struct ReadmePatch<'a> {
    pub header: &'a str,
    pub image_alt: &'a str,
    /// Image path written when the section has no chart line yet.
    pub image_target: &'a str,
    pub stamp: String,
}

/// Patched document, or `None` when the section is not present.
pub fn patch_content(content: &str, patch: &ReadmePatch<'_>) -> Option<String> {
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    let range = section_range(&lines, patch.header)?;

    let mut section: Vec<String> = lines[range.clone()]
        .iter()
        .filter(|l| !STAMP_LINE.is_match(l.trim()))
        .cloned()
        .collect();

    let image_prefix = format!("![{}]", patch.image_alt);
    match section
        .iter()
        .position(|l| l.trim().starts_with(&image_prefix))
    {
        Some(idx) => {
            section.splice(idx..idx, [patch.stamp.clone(), String::new()]);
        }
        None => {
            let idx = section
                .iter()
                .position(|l| l.trim() == CONTENT_MARKER)
                .unwrap_or_else(|| {
                    let mut end = section.len();
                    while end > 1 && section[end - 1].trim().is_empty() {
                        end -= 1;
                    }
                    end
                });
            section.splice(
                idx..idx,
                [
                    patch.stamp.clone(),
                    String::new(),
                    format!("![{}]({})", patch.image_alt, patch.image_target),
                    String::new(),
                ],
            );
        }
    }

    let mut merged = Vec::with_capacity(lines.len() + 4);
    merged.extend_from_slice(&lines[..range.start]);
    merged.extend(collapse_blank_runs(section));
    merged.extend_from_slice(&lines[range.end..]);
    Some(format!("{}\n", merged.join("\n").trim_end()))
}

/// Stamp the README in place. Returns whether anything was written; a missing
/// file or section is not an error.
pub fn patch_readme(path: &Path, patch: &ReadmePatch<'_>) -> Result<bool> {
    if !path.exists() {
        debug!(path = %path.display(), "no README; skipping timestamp");
        return Ok(false);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let Some(updated) = patch_content(&content, patch) else {
        debug!(header = patch.header, "README section not found; skipping timestamp");
        return Ok(false);
    };
    if updated == content {
        return Ok(false);
    }
    fs::write(path, &updated).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), header = patch.header, "README timestamp updated");
    Ok(true)
}
