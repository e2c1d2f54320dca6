// src/fetch/browser.rs
//
// Headless Chrome as a page renderer: `--dump-dom` prints the DOM after
// scripts have run, which is all the link scorer needs.

use anyhow::{bail, Context, Result};
use std::{path::Path, process::Stdio, time::Duration};
use tokio::{process::Command, time::timeout};
use tracing::{debug, info, instrument, warn};

use super::FetchError;
use crate::config::BrowserConfig;

/// Flags every launch gets.
pub const BASE_ARGS: &[&str] = &[
    "--headless=new",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--remote-allow-origins=*",
    "--window-size=1920,1080",
    "--disable-blink-features=AutomationControlled",
    "--ignore-certificate-errors",
    "--lang=zh-TW",
];

fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .chars()
        .take(300)
        .collect()
}

async fn dump_dom(
    browser: &BrowserConfig,
    extra: &[String],
    url: &str,
    limit: Duration,
) -> Result<String> {
    let mut cmd = Command::new(&browser.binary);
    cmd.args(BASE_ARGS)
        .args(extra)
        .args(&browser.args)
        .arg("--dump-dom")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(binary = %browser.binary, ?extra, "launching browser");

    let output = match timeout(limit, cmd.output()).await {
        Ok(res) => res.with_context(|| format!("launching {}", browser.binary))?,
        Err(_) => {
            return Err(FetchError::Timeout {
                what: format!("rendering {}", url),
                secs: limit.as_secs(),
            }
            .into())
        }
    };
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            browser.binary,
            output.status,
            first_line(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Render `url` and return the resulting DOM as HTML. The profile lives in
/// `profile_dir`, which the caller owns and removes.
#[instrument(level = "info", skip(browser, user_agent, profile_dir))]
pub async fn render_page(
    browser: &BrowserConfig,
    user_agent: &str,
    url: &str,
    profile_dir: &Path,
) -> Result<String> {
    let extra = vec![
        format!("--user-agent={}", user_agent),
        format!("--user-data-dir={}", profile_dir.display()),
    ];
    let html = dump_dom(
        browser,
        &extra,
        url,
        Duration::from_secs(browser.timeout_secs),
    )
    .await?;
    info!(bytes = html.len(), "rendered page");
    Ok(html)
}

/// Outcome of one diagnostic launch.
#[derive(Debug, Clone)]
pub struct Probe {
    pub profile: &'static str,
    pub ok: bool,
    pub detail: String,
}

/// Try launch profiles in turn until one renders `about:blank`; the usual
/// failure on CI runners is an unwritable default profile or crash-dump dir.
pub async fn probe_launch(browser: &BrowserConfig, scratch: &Path) -> Vec<Probe> {
    let profiles: Vec<(&'static str, Vec<String>)> = vec![
        ("default", Vec::new()),
        (
            "explicit profile and crash-dump dirs",
            vec![
                format!("--user-data-dir={}", scratch.join("profile").display()),
                format!("--crash-dumps-dir={}", scratch.join("crashes").display()),
            ],
        ),
        (
            "verbose logging",
            vec![
                format!("--user-data-dir={}", scratch.join("profile-verbose").display()),
                "--enable-logging=stderr".to_string(),
                "--v=1".to_string(),
            ],
        ),
    ];

    let limit = Duration::from_secs(browser.timeout_secs.min(30));
    let mut out = Vec::new();
    for (profile, extra) in profiles {
        match dump_dom(browser, &extra, "about:blank", limit).await {
            Ok(_) => {
                out.push(Probe {
                    profile,
                    ok: true,
                    detail: "rendered about:blank".to_string(),
                });
                break;
            }
            Err(e) => {
                warn!(profile, error = %e, "browser launch failed");
                out.push(Probe {
                    profile,
                    ok: false,
                    detail: format!("{:#}", e),
                });
            }
        }
    }
    out
}
