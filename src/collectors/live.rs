use super::{LiveReading, LiveSource};
use reqwest::{Client, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("live source request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("live source returned status {0}")]
    Status(StatusCode),
    #[error("live source returned a malformed body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Live metrics endpoint reached over HTTP. One GET per fetch, no retry and
/// no timeout beyond what the client carries.
pub struct HttpMetricsSource {
    client: Client,
    url: String,
}

impl HttpMetricsSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl LiveSource for HttpMetricsSource {
    async fn fetch(&self) -> Result<LiveReading, SourceError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
