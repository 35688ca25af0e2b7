//! HTTP client wrapper for metadata requests and streaming payload downloads.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::FetchError;
use super::filename::partial_path;
use super::{ContentClass, Fetcher};
use crate::user_agent;

/// Shared HTTP client for every resolver and Job in a run.
///
/// Cloning is cheap and clones share one connection pool.
///
/// # Example
///
/// ```no_run
/// use linkfetch_core::fetch::{ContentClass, Fetcher, HttpClient};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let bytes = client
///     .fetch_to_file("https://example.com/file.zip", Path::new("./file.zip"), &ContentClass::Any)
///     .await?;
/// println!("Downloaded {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    metadata_timeout: Duration,
}

impl HttpClient {
    /// Creates a client with the default timeouts (30s connect, 5min idle read).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the TLS backend cannot initialize.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values in seconds.
    ///
    /// `read_timeout_secs` bounds the idle time between body reads, so a
    /// payload that keeps streaming is never cut off. Metadata requests made
    /// through [`Fetcher::fetch_bytes`] also get it as a total deadline.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the TLS backend cannot initialize.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(|source| FetchError::ClientBuild { source })?;
        Ok(Self {
            client,
            metadata_timeout: Duration::from_secs(read_timeout_secs),
        })
    }

    async fn get(
        &self,
        url: &str,
        total: Option<Duration>,
    ) -> Result<reqwest::Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let mut request = self.client.get(url);
        if let Some(total) = total {
            request = request.timeout(total);
        }
        request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[async_trait]
impl Fetcher for HttpClient {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url, Some(self.metadata_timeout)).await?;
        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "non-success status on metadata request");
            return Err(FetchError::http_status(url, status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        Ok(body.to_vec())
    }

    #[instrument(skip(self, class), fields(url = %url, dest = %dest.display()))]
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        class: &ContentClass,
    ) -> Result<u64, FetchError> {
        let response = self.get(url, None).await?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "non-OK HTTP status for payload");
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !class.accepts(&content_type) {
            warn!(content_type = %content_type, "response is not a download payload");
            return Err(FetchError::unexpected_content(url, content_type));
        }

        let part = partial_path(dest);
        debug!(part = %part.display(), content_type = %content_type, "streaming payload");

        let result = stream_to_file(response, url, &part).await;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %part.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(FetchError::io(dest, e));
        }

        info!(path = %dest.display(), bytes, "payload written");
        Ok(bytes)
    }
}

/// Streams the response body into a freshly created file, returning bytes written.
async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError> {
    let file = File::create(file_path)
        .await
        .map_err(|e| FetchError::io(file_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::from_reqwest(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;

    Ok(bytes_written)
}
