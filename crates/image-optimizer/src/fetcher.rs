//! Source image fetching

use crate::error::{OptimizerError, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Largest source body accepted, in bytes
pub const MAX_SOURCE_BYTES: u64 = 32 * 1024 * 1024;

/// Supplier of original image bytes
pub trait SourceFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// HTTP client for fetching source images
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_limit(MAX_SOURCE_BYTES)
    }

    pub fn with_limit(max_bytes: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            debug!(url = %url, "Fetching source image");

            let mut response = self.client.get(url).send().await?;

            if !response.status().is_success() {
                warn!(status = %response.status(), url = %url, "Failed to fetch source image");
                return Err(OptimizerError::Upstream(response.status().as_u16()));
            }

            if let Some(len) = response.content_length() {
                if len > self.max_bytes {
                    warn!(url = %url, size = len, "Source image too large");
                    return Err(OptimizerError::SourceTooLarge(self.max_bytes));
                }
            }

            // Content-Length can be absent or wrong, so count while reading
            let mut data = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if (data.len() + chunk.len()) as u64 > self.max_bytes {
                    warn!(url = %url, "Source image too large");
                    return Err(OptimizerError::SourceTooLarge(self.max_bytes));
                }
                data.extend_from_slice(&chunk);
            }
            debug!(url = %url, size = data.len(), "Fetched source image");
            Ok(data)
        })
    }
}
