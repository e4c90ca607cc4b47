//! HTTP-backed artifact store client.

use async_trait::async_trait;
use reqwest::Client;

use super::{ArtifactStore, ClientError};

/// Stores artifacts via a simple PUT/DELETE object API.
pub struct HttpArtifactStore {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            bearer_token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ClientError> {
        let url = self.object_url(key);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ClientError::Request {
            url: url.clone(),
            source: e,
        })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "artifact store",
                status: response.status().as_u16(),
            });
        }

        Ok(url)
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        let url = self.object_url(key);
        let mut request = self.client.delete(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ClientError::Request {
            url: url.clone(),
            source: e,
        })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "artifact store",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}
