//! Retrieval of GBFS documents over HTTP or from local files.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

/// GETs `url` and returns the body. Non-2xx responses are errors.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid feed url {url}"))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    debug!(url, bytes = bytes.len(), "Fetched feed");
    Ok(bytes.to_vec())
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip_all, fields(source = %source))]
pub async fn read_source(source: &str, timeout: Duration) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = BasicClient::with_timeout(timeout)?;
        fetch_bytes(&client, source).await
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read {source}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
        inner: BasicClient,
    }

    #[async_trait]
    impl HttpClient for CountingClient {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.execute(req).await
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let client = CountingClient {
            calls: AtomicUsize::new(0),
            inner: BasicClient::new(),
        };
        let err = fetch_bytes(&client, "not a url").await.unwrap_err();
        assert!(err.to_string().contains("invalid feed url"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_source_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"last_updated": 1}"#).unwrap();

        let bytes = read_source(file.path().to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bytes, br#"{"last_updated": 1}"#);
    }

    #[tokio::test]
    async fn test_read_source_missing_file() {
        let err = read_source("/nonexistent/station_status.json", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
