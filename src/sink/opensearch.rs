use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, error, info};
use opensearch::{
    auth::Credentials,
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    BulkParts, IndexParts, OpenSearch,
};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::config::IndexConfig;
use crate::error::{EtlError, Result};

use super::{BulkFailure, BulkSummary, IdentifiedDocument, IndexSink};

/// OpenSearch/Elasticsearch-compatible index writer.
pub struct OpenSearchSink {
    client: OpenSearch,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

impl OpenSearchSink {
    /// Connect to the cluster described by `config`.
    ///
    /// No request is made here; connectivity problems surface on the first
    /// write.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| EtlError::Config(format!("Invalid index URL: {e}")))?;

        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool).disable_proxy();
        if let Some(username) = &config.username {
            builder = builder.auth(Credentials::Basic(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }
        let transport = builder
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to create index transport: {e}")))?;

        info!("Created index client for {}", config.url);

        Ok(Self {
            client: OpenSearch::new(transport),
        })
    }

    fn failure_reason(error: &Value) -> String {
        match (
            error.get("type").and_then(Value::as_str),
            error.get("reason").and_then(Value::as_str),
        ) {
            (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
            (None, Some(reason)) => reason.to_string(),
            _ => error.to_string(),
        }
    }

    /// Split a bulk response into successes and per-item failures.
    ///
    /// Items come back in request order; `documents` fills in ids the
    /// response leaves out.
    fn summarize(response: BulkResponse, documents: &[IdentifiedDocument]) -> BulkSummary {
        let mut summary = BulkSummary::default();

        for (position, item) in response.items.into_iter().enumerate() {
            let Some(item) = item.into_values().next() else {
                continue;
            };

            let failed = item.error.is_some() || !(200..300).contains(&item.status);
            if !failed {
                summary.succeeded += 1;
                continue;
            }

            let id = item
                .id
                .or_else(|| documents.get(position).map(|d| d.id.clone()))
                .unwrap_or_default();
            let reason = item
                .error
                .as_ref()
                .map_or_else(|| format!("status {}", item.status), Self::failure_reason);

            summary.failed.push(BulkFailure {
                id,
                status: item.status,
                reason,
            });
        }

        summary
    }
}

#[async_trait]
impl IndexSink for OpenSearchSink {
    async fn bulk_create(
        &self,
        index: &str,
        documents: &[IdentifiedDocument],
    ) -> Result<BulkSummary> {
        if documents.is_empty() {
            return Ok(BulkSummary::default());
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(documents.len() * 2);
        for doc in documents {
            body.push(json!({"create": {"_index": index, "_id": doc.id}}).into());
            body.push(serde_json::to_value(&doc.source)?.into());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| EtlError::Load(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("Bulk request to {index} failed with status {status}: {error_body}");
            return Err(EtlError::Load(format!(
                "Bulk request failed with status {status}: {error_body}"
            )));
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .map_err(|e| EtlError::Load(format!("Unreadable bulk response: {e}")))?;

        let summary = Self::summarize(parsed, documents);
        debug!(
            "Bulk request to {index}: {} created, {} rejected",
            summary.succeeded,
            summary.failed.len()
        );
        Ok(summary)
    }

    async fn index_document(&self, index: &str, document: &Value) -> Result<()> {
        let response = self
            .client
            .index(IndexParts::Index(index))
            .body(document)
            .send()
            .await
            .map_err(|e| EtlError::Load(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("Index request to {index} failed with status {status}: {error_body}");
            return Err(EtlError::Load(format!(
                "Index request failed with status {status}: {error_body}"
            )));
        }

        debug!("Indexed document into {index}");
        Ok(())
    }
}
