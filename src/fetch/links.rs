// src/fetch/links.rs

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::config::DatasetConfig;

/// Phrases the source's WAF and error pages use.
const REJECTED_SIGNALS: &[&str] = &[
    "request rejected",
    "the requested url was rejected",
    "access denied",
    "forbidden",
    "security policy",
];

/// A scored anchor from the data page.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCandidate {
    pub url: Url,
    pub score: i32,
    /// Title, text, href, aria-label and enclosing table-row text, joined.
    pub haystack: String,
}

pub fn is_rejected_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    REJECTED_SIGNALS.iter().any(|s| lower.contains(s))
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn enclosing_row_text(link: &ElementRef<'_>) -> String {
    link.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "tr")
        .map(|tr| squash(&tr.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default()
}

/// Sum of keyword-group weights whose text appears in `haystack`.
pub fn score_haystack(haystack: &str, ds: &DatasetConfig) -> i32 {
    let lower = haystack.to_lowercase();
    ds.link_keywords
        .iter()
        .filter(|k| k.any.iter().any(|w| lower.contains(&w.to_lowercase())))
        .map(|k| k.weight)
        .sum()
}

/// Pick the anchor that best matches the dataset, if it clears the
/// dataset's minimum score. Ties keep the earliest link on the page.
pub fn find_download_link(html: &str, base: &Url, ds: &DatasetConfig) -> Option<LinkCandidate> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("a").expect("anchor selector should parse");

    let mut best: Option<LinkCandidate> = None;
    let mut seen: Vec<String> = Vec::new();

    for link in doc.select(&selector) {
        let el = link.value();
        let title = el.attr("title").unwrap_or("").trim();
        let text = squash(&link.text().collect::<Vec<_>>().join(" "));
        let href = el
            .attr("href")
            .or_else(|| el.attr("data-href"))
            .or_else(|| el.attr("data-url"))
            .unwrap_or("")
            .trim();
        let aria = el.attr("aria-label").unwrap_or("").trim();
        let row = enclosing_row_text(&link);

        let haystack = [title, text.as_str(), href, aria, row.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if haystack.is_empty() {
            continue;
        }
        if seen.len() < 10 {
            seen.push(haystack.clone());
        }

        let Some(url) = base
            .join(href)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .filter(|_| !href.is_empty() && !href.starts_with('#'))
        else {
            continue;
        };

        let score = score_haystack(&haystack, ds);
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(LinkCandidate {
                url,
                score,
                haystack,
            });
        }
    }

    match best {
        Some(c) if c.score >= ds.min_link_score => {
            info!(url = %c.url, score = c.score, "matched download link");
            Some(c)
        }
        _ => {
            if seen.is_empty() {
                info!("page has no link candidates");
            } else {
                for item in &seen {
                    debug!(candidate = %item, "unmatched link");
                }
                info!(
                    target = %ds.target_name,
                    candidates = seen.len(),
                    "no link cleared the score threshold"
                );
            }
            None
        }
    }
}
