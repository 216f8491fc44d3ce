//! Retrieval of blacklist sources.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;

/// Fetches the raw body of a list source.
#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher for `http(s)://` URLs, with `file://` URLs read from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dnsgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ListFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path)
                .await
                .map_err(|source| FetchError::File {
                    path: PathBuf::from(path),
                    source,
                });
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn fetch_reads_file_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.0.0.0 ads.example.com").unwrap();
        let url = format!("file://{}", file.path().display());

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let body = fetcher.fetch(&url).await.unwrap();

        assert_eq!(body, b"0.0.0.0 ads.example.com\n");
    }

    #[tokio::test]
    async fn fetch_reports_missing_file() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

        let err = fetcher
            .fetch("file:///nonexistent/dnsgate/list.txt")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::File { .. }));
    }

    #[tokio::test]
    async fn fetch_rejects_invalid_url() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch("not a url").await.unwrap_err();

        assert!(matches!(err, FetchError::Http(_)));
    }
}
