// src/fetch/mod.rs

use anyhow::{anyhow, Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER},
    Client,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::{Config, DatasetConfig, HttpConfig};

pub mod browser;
pub mod export;
pub mod links;

#[cfg(test)]
mod test_server;

pub use links::{find_download_link, is_rejected_page, LinkCandidate};

/// Failures the fetch phase distinguishes; everything else is plain I/O or HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source rejected the request ({0})")]
    Rejected(String),
    #[error("server returned an HTML page instead of a data file")]
    HtmlInsteadOfData,
    #[error("no download link for 「{target}」 on the page")]
    NoMatchingLink { target: String },
    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },
}

/// Where a downloaded file came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    DirectExport,
    PageLink { score: i32 },
}

#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    pub origin: Origin,
}

/// Session client: cookie store, browser-like headers, and certificate
/// checks relaxed when configured (the portal's chain is often incomplete).
pub fn build_client(http: &HttpConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&http.accept_language).context("invalid accept_language")?,
    );
    Client::builder()
        .cookie_store(true)
        .gzip(true)
        .user_agent(http.user_agent.clone())
        .default_headers(headers)
        .danger_accept_invalid_certs(http.accept_invalid_certs)
        .build()
        .context("building HTTP client")
}

async fn fetch_page(client: &Client, cfg: &Config, workdir: &Path) -> Result<String> {
    if cfg.browser.enabled {
        let profile = workdir.join("browser-profile");
        return browser::render_page(&cfg.browser, &cfg.http.user_agent, &cfg.base_url, &profile)
            .await;
    }
    client
        .get(&cfg.base_url)
        .header(REFERER, &cfg.base_url)
        .timeout(Duration::from_secs(cfg.http.page_timeout_secs))
        .send()
        .await
        .with_context(|| format!("GET {}", cfg.base_url))?
        .error_for_status()?
        .text()
        .await
        .with_context(|| format!("reading body from {}", cfg.base_url))
}

/// One scrape attempt: load the data page, score its links, download the best.
async fn scrape_once(
    client: &Client,
    cfg: &Config,
    ds: &DatasetConfig,
    workdir: &Path,
) -> Result<Download> {
    let html = fetch_page(client, cfg, workdir).await?;
    if is_rejected_page(&html) {
        return Err(FetchError::Rejected("data page".to_string()).into());
    }
    let base = Url::parse(&cfg.base_url)?;
    let link = find_download_link(&html, &base, ds).ok_or_else(|| FetchError::NoMatchingLink {
        target: ds.target_name.clone(),
    })?;
    let path = export::download_file(
        client,
        &link.url,
        &cfg.base_url,
        Duration::from_secs(cfg.http.export_timeout_secs),
        workdir,
        &ds.id,
    )
    .await?;
    Ok(Download {
        path,
        origin: Origin::PageLink { score: link.score },
    })
}

/// Download the dataset into `workdir`: the direct export URL first (when
/// configured), then up to `http.attempts` scrapes of the data page with a
/// growing pause between attempts.
#[instrument(level = "info", skip(client, cfg, ds, workdir), fields(dataset = %ds.id))]
pub async fn fetch_dataset(
    client: &Client,
    cfg: &Config,
    ds: &DatasetConfig,
    workdir: &Path,
) -> Result<Download> {
    if let Some(export_url) = &ds.export_url {
        match export::download_direct_export(
            client,
            &cfg.base_url,
            export_url,
            Duration::from_secs(cfg.http.page_timeout_secs),
            Duration::from_secs(cfg.http.export_timeout_secs),
            workdir,
        )
        .await
        {
            Ok(path) => {
                return Ok(Download {
                    path,
                    origin: Origin::DirectExport,
                })
            }
            Err(e) => warn!(error = %e, "direct export failed; falling back to page scrape"),
        }
    }

    let attempts = cfg.http.attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        info!(attempt, attempts, "scraping data page");
        match scrape_once(client, cfg, ds, workdir).await {
            Ok(d) => return Ok(d),
            Err(e) => {
                warn!(attempt, error = %e, "scrape attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    sleep(Duration::from_secs(2 * attempt as u64)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no fetch attempts were made")))
}
