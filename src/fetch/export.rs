use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::{
    header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE, REFERER},
    Client,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};
use url::Url;

use super::FetchError;

/// Bytes inspected to tell a data file from an HTML error page.
const SNIFF_LEN: usize = 1024;

/// Pick a file extension from the response headers, defaulting to `.csv`.
pub fn guess_extension(headers: &HeaderMap) -> &'static str {
    let get = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase()
    };
    let content_type = get(CONTENT_TYPE);
    let disposition = get(CONTENT_DISPOSITION);

    if content_type.contains("xlsx")
        || content_type.contains("spreadsheetml")
        || disposition.contains(".xlsx")
    {
        ".xlsx"
    } else if content_type.contains("excel") || disposition.contains(".xls") {
        ".xls"
    } else {
        ".csv"
    }
}

/// `Err` when the leading bytes look like an HTML page rather than data.
pub fn check_not_html(head: &[u8]) -> Result<(), FetchError> {
    let preview = String::from_utf8_lossy(&head[..head.len().min(SNIFF_LEN)]).to_lowercase();
    if preview.contains("<html") || preview.contains("<!doctype html") {
        if preview.contains("request rejected") || preview.contains("access denied") {
            return Err(FetchError::Rejected("export URL refused".to_string()));
        }
        return Err(FetchError::HtmlInsteadOfData);
    }
    Ok(())
}

/// GET `url` and stream the body into `dir/<stem><ext>`, refusing HTML.
pub async fn download_file(
    client: &Client,
    url: &Url,
    referer: &str,
    timeout: Duration,
    dir: &Path,
    stem: &str,
) -> Result<PathBuf> {
    let resp = client
        .get(url.clone())
        .header(REFERER, referer)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?
        .error_for_status()
        .with_context(|| format!("non-success status from {}", url))?;

    let ext = guess_extension(resp.headers());
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path = dir.join(format!("{}{}", stem, ext));

    let mut file = fs::File::create(&path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
    let mut size = 0usize;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("reading body from {}", url))?;
        if head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        size += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    info!(%url, content_type = %content_type, bytes = size, "downloaded");
    if let Err(e) = check_not_html(&head) {
        debug!(preview = %String::from_utf8_lossy(&head[..head.len().min(200)]), "rejected body");
        let _ = fs::remove_file(&path).await;
        return Err(e.into());
    }
    Ok(path)
}

/// Visit the landing page for cookies, then fetch the export URL directly.
pub async fn download_direct_export(
    client: &Client,
    base_url: &str,
    export_url: &str,
    page_timeout: Duration,
    export_timeout: Duration,
    dir: &Path,
) -> Result<PathBuf> {
    info!(url = %export_url, "trying direct export");
    if let Err(e) = client
        .get(base_url)
        .header(REFERER, base_url)
        .timeout(page_timeout)
        .send()
        .await
    {
        warn!(error = %e, "landing page warm-up failed; continuing");
    }
    let url = Url::parse(export_url).with_context(|| format!("parsing {}", export_url))?;
    download_file(client, &url, base_url, export_timeout, dir, "direct_export").await
}

#[cfg(test)]
mod tests {
    use super::super::test_server::{Reply, TestServer};
    use super::*;
    use reqwest::header::HeaderValue;
    use tempfile::tempdir;

    const LOGIN_HTML: &str =
        "<!DOCTYPE html><html><head><title>登入</title></head><body>請先登入</body></html>";

    fn headers(ct: &str, cd: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        h.insert(CONTENT_DISPOSITION, HeaderValue::from_str(cd).unwrap());
        h
    }

    #[test]
    fn extension_from_headers() {
        assert_eq!(
            guess_extension(&headers(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ""
            )),
            ".xlsx"
        );
        assert_eq!(
            guess_extension(&headers("application/octet-stream", "attachment; filename=a.xls")),
            ".xls"
        );
        assert_eq!(guess_extension(&headers("text/csv", "")), ".csv");
        assert_eq!(guess_extension(&HeaderMap::new()), ".csv");
    }

    #[test]
    fn html_bodies_are_refused() {
        assert!(check_not_html("年月,棟數\n11301,1".as_bytes()).is_ok());
        assert!(matches!(
            check_not_html(b"<!DOCTYPE html><html><body>oops</body></html>"),
            Err(FetchError::HtmlInsteadOfData)
        ));
        assert!(matches!(
            check_not_html(b"<html><title>Request Rejected</title></html>"),
            Err(FetchError::Rejected(_))
        ));
    }

    fn big_csv() -> String {
        let mut body = String::from("年月,縣市,棟數\n");
        for i in 0..200 {
            body.push_str(&format!("{}{:02},全國,{}\n", 100 + i / 12, i % 12 + 1, 20000 + i));
        }
        body
    }

    #[tokio::test]
    async fn streamed_body_is_written_whole() {
        let body = big_csv();
        assert!(body.len() > 2 * SNIFF_LEN);
        let server = TestServer::start(vec![(
            "/data",
            vec![Reply::ok("text/csv", body.clone()).split(700)],
        )])
        .await;
        let client = Client::new();
        let dir = tempdir().unwrap();
        let url = Url::parse(&server.url("/data")).unwrap();

        let path = download_file(&client, &url, &server.base, Duration::from_secs(5), dir.path(), "ds")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("ds.csv"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    }

    #[tokio::test]
    async fn html_split_across_chunks_is_refused_and_removed() {
        let server = TestServer::start(vec![(
            "/data",
            vec![Reply::ok("application/octet-stream", LOGIN_HTML).split(5)],
        )])
        .await;
        let client = Client::new();
        let dir = tempdir().unwrap();
        let url = Url::parse(&server.url("/data")).unwrap();

        let err = download_file(&client, &url, &server.base, Duration::from_secs(5), dir.path(), "ds")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FetchError>(),
            Some(FetchError::HtmlInsteadOfData)
        ));
        assert!(!dir.path().join("ds.csv").exists());
    }

    #[tokio::test]
    async fn direct_export_visits_landing_page_first() {
        let server = TestServer::start(vec![
            ("/page", vec![Reply::status(500)]),
            ("/export", vec![Reply::ok("text/csv", "年月,棟數\n11305,1\n")]),
        ])
        .await;
        let client = Client::new();
        let dir = tempdir().unwrap();

        let path = download_direct_export(
            &client,
            &server.url("/page"),
            &server.url("/export?do=export&t=4&k=1&n=3"),
            Duration::from_secs(5),
            Duration::from_secs(5),
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(path, dir.path().join("direct_export.csv"));
        assert_eq!(server.hits(), vec!["/page", "/export"]);
    }

    #[tokio::test]
    async fn error_status_is_not_saved() {
        let server = TestServer::start(vec![("/data", vec![Reply::status(503)])]).await;
        let client = Client::new();
        let dir = tempdir().unwrap();
        let url = Url::parse(&server.url("/data")).unwrap();

        assert!(download_file(&client, &url, &server.base, Duration::from_secs(5), dir.path(), "ds")
            .await
            .is_err());
        assert!(!dir.path().join("ds.csv").exists());
    }
}
