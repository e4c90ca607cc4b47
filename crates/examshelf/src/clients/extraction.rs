//! HTTP client for the text extraction service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ClientError, Extraction, TextExtractor};

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    text: String,
    #[serde(default)]
    page_count: Option<u32>,
}

/// Talks to the extraction service over its `/health` and `/extract`
/// endpoints.
pub struct HttpTextExtractor {
    client: Client,
    base_url: String,
    health_timeout: Duration,
}

impl HttpTextExtractor {
    pub fn new(base_url: impl Into<String>, health_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            health_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn health_check(&self) -> Result<(), ClientError> {
        let url = self.endpoint("/health");
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| ClientError::Request {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "extraction service",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<Extraction, ClientError> {
        let url = self.endpoint("/extract");
        let response = self
            .client
            .post(&url)
            .query(&[("filename", filename)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| ClientError::Request {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "extraction service",
                status: response.status().as_u16(),
            });
        }

        let parsed: ExtractResponse =
            response.json().await.map_err(|e| ClientError::Request {
                url,
                source: e,
            })?;

        Ok(Extraction {
            text: parsed.text,
            page_count: parsed.page_count,
        })
    }
}
