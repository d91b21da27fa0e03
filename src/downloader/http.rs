//! HTTP transport backed by a shared `reqwest` client.

use super::{Downloader, FetchError};
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::trace;

/// Production downloader. One instance shares its connection pool across
/// every concurrent fetch.
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Builds a client with the given connect timeout. The per-request
    /// deadline is enforced by the retry layer, not the client.
    pub fn new(connect_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FetchError::permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Server errors and throttling can clear on retry; other client errors
/// will repeat identically.
fn status_is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        trace!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(format!("request error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {} for {}", status, url);
            return if status_is_transient(status) {
                Err(FetchError::transient(message))
            } else {
                Err(FetchError::permanent(message))
            };
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(format!("body read error: {}", e)))
    }
}
