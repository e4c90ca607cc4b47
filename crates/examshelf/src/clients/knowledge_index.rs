//! HTTP client for the knowledge index.
//!
//! Bound to a single index: data sources are created under it and
//! indexing runs are started against it.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{ClientError, IndexRunStatus, KnowledgeIndex};

#[derive(Debug, Deserialize)]
struct DataSourceResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IndexingRunResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IndexingStatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpKnowledgeIndex {
    client: Client,
    base_url: String,
    index_id: String,
    api_token: String,
}

impl HttpKnowledgeIndex {
    pub fn new(
        base_url: impl Into<String>,
        index_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            index_id: index_id.into(),
            api_token: api_token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/indexes/{}{}",
            self.base_url.trim_end_matches('/'),
            self.index_id,
            path
        )
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Request {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "knowledge index",
                status: response.status().as_u16(),
            });
        }

        response.json().await.map_err(|e| ClientError::Request {
            url,
            source: e,
        })
    }
}

#[async_trait]
impl KnowledgeIndex for HttpKnowledgeIndex {
    async fn create_data_source(&self, location: &str) -> Result<String, ClientError> {
        let response: DataSourceResponse = self
            .post_json(
                self.endpoint("/data_sources"),
                json!({ "type": "url_list", "urls": [location] }),
            )
            .await?;
        Ok(response.id)
    }

    async fn start_indexing(&self, data_source_refs: &[String]) -> Result<String, ClientError> {
        let response: IndexingRunResponse = self
            .post_json(
                self.endpoint("/indexing_runs"),
                json!({ "data_source_ids": data_source_refs }),
            )
            .await?;
        Ok(response.id)
    }

    async fn get_index_status(&self, run_ref: &str) -> Result<IndexRunStatus, ClientError> {
        let url = self.endpoint(&format!("/indexing_runs/{}", run_ref));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ClientError::Request {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                service: "knowledge index",
                status: response.status().as_u16(),
            });
        }

        let parsed: IndexingStatusResponse =
            response.json().await.map_err(|e| ClientError::Request {
                url,
                source: e,
            })?;

        Ok(match parsed.status.as_str() {
            "completed" | "indexed" => IndexRunStatus::Indexed,
            "failed" | "error" => IndexRunStatus::Failed {
                message: parsed.error.unwrap_or_else(|| "indexing failed".to_string()),
            },
            _ => IndexRunStatus::Pending,
        })
    }
}
