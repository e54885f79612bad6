//! Fetching files from update mirrors.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CACHE_CONTROL;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::progress_stream::{ProgressCallback, ProgressStream};
use crate::utils::TransportError;

/// Downloads a single URL into a file.
///
/// Dropping the returned future aborts the transfer; this is how in-flight
/// downloads are cancelled.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Download `url` into `destination`, creating parent directories and
    /// replacing any existing file. `progress` receives the cumulative number
    /// of bytes written. Returns the total number of bytes written.
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: ProgressCallback,
    ) -> Result<u64, TransportError>;
}

/// Default spacing between progress reports of one transfer
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP(S) transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    progress_interval: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("update-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Report progress at most once per `interval`; zero reports every chunk
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: ProgressCallback,
    ) -> Result<u64, TransportError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache, no-store")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut body = ProgressStream::new(Box::pin(response.bytes_stream()), progress)
            .with_interval(self.progress_interval);
        let mut file = tokio::fs::File::create(destination).await?;

        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        debug!(url, bytes = body.bytes_transferred(), "Transfer finished");
        Ok(body.bytes_transferred())
    }
}
