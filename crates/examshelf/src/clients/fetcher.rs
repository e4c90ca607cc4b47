//! HTTP fetcher for remote document sources.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{ClientError, SourceFetcher};

const USER_AGENT: &str = concat!("examshelf/", env!("CARGO_PKG_VERSION"));

/// Downloads remote sources with a bounded per-request timeout.
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Request {
                url: url.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "source",
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| ClientError::Request {
            url: url.to_string(),
            source: e,
        })?;

        Ok(bytes.to_vec())
    }
}
