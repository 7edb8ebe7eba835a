//! Hosted vector index reached over a Pinecone-compatible REST API.
//!
//! All records live in one namespace. Text handed to [`RemoteIndex::add`]
//! is re-split with a recursive character splitter, embedded, and upserted
//! in fixed-size batches; a batch that fails is logged and skipped so one
//! bad request does not abort the whole ingestion.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{EmbeddingIndex, Readiness};
use crate::chunk::CharSplitter;
use crate::config::RemoteIndexConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const API_VERSION: &str = "2024-07";
const READY_POLL_ATTEMPTS: u32 = 30;

pub struct RemoteIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: String,
    embedder: Arc<dyn EmbeddingProvider>,
    splitter: CharSplitter,
    batch_size: usize,
}

impl RemoteIndex {
    /// Validate credentials, make sure the index exists, and resolve its
    /// data-plane host.
    pub async fn connect(
        config: &RemoteIndexConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        if config.namespace.trim().is_empty() {
            return Err(RagError::InvalidArgument(
                "remote index namespace must not be empty".to_string(),
            ));
        }
        if config.index_name.trim().is_empty() {
            return Err(RagError::IndexUnavailable(
                "remote index name is not configured".to_string(),
            ));
        }
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                return Err(RagError::MissingCredential {
                    name: config.api_key_env.clone(),
                })
            }
        };
        if embedder.dims() != config.dimension {
            return Err(RagError::DimensionMismatch {
                index: config.dimension,
                embedder: embedder.dims(),
            });
        }
        if config.batch_size == 0 {
            return Err(RagError::InvalidArgument(
                "remote upsert batch size must be > 0".to_string(),
            ));
        }
        let splitter = CharSplitter::new(config.chunk_size, config.chunk_overlap)?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| RagError::IndexUnavailable(format!("HTTP client: {}", e)))?;

        let host = match &config.host {
            Some(host) => host.clone(),
            None => resolve_host(&client, config, &api_key).await?,
        };
        let host = normalize_host(&host);
        tracing::info!(
            index = %config.index_name,
            namespace = %config.namespace,
            %host,
            "connected to remote index"
        );

        Ok(Self {
            client,
            host,
            api_key,
            namespace: config.namespace.clone(),
            embedder,
            splitter,
            batch_size: config.batch_size,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.host, path);
        let response = with_headers(self.client.post(&url), &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("{}: {}", path, e)))?;
        read_json(response, path).await
    }

    async fn upsert_batch(&self, chunks: &[String]) -> Result<usize> {
        let vectors = self.embedder.embed(chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        let records: Vec<Value> = chunks
            .iter()
            .zip(vectors)
            .map(|(text, values)| {
                json!({
                    "id": uuid::Uuid::new_v4().to_string(),
                    "values": values,
                    "metadata": { "text": text },
                })
            })
            .collect();
        let body = json!({ "vectors": records, "namespace": self.namespace });
        let response = self.post("/vectors/upsert", &body).await?;
        Ok(response
            .get("upsertedCount")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(chunks.len()))
    }
}

#[async_trait]
impl EmbeddingIndex for RemoteIndex {
    fn name(&self) -> &str {
        "remote"
    }

    fn readiness(&self) -> Readiness {
        Readiness::Live
    }

    fn splits_internally(&self) -> bool {
        true
    }

    async fn add(&self, texts: &[String]) -> Result<usize> {
        let combined = texts.join("\n\n");
        let chunks = self.splitter.split(&combined);
        if chunks.is_empty() {
            return Ok(0);
        }
        tracing::info!(chunks = chunks.len(), "adding chunks to remote index");

        let mut written = 0;
        for (i, batch) in chunks.chunks(self.batch_size).enumerate() {
            match self.upsert_batch(batch).await {
                Ok(n) => written += n,
                Err(e) => {
                    tracing::error!(batch = i, size = batch.len(), error = %e, "upsert batch failed, skipping");
                }
            }
        }
        tracing::info!(written, "remote ingestion finished");
        Ok(written)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let vector = self.embedder.embed_query(query).await?;
        let body = json!({
            "vector": vector,
            "topK": k.max(1),
            "includeMetadata": true,
            "namespace": self.namespace,
        });
        let response = self.post("/query", &body).await?;
        let texts: Vec<String> = response
            .get("matches")
            .and_then(Value::as_array)
            .map(|matches| {
                matches
                    .iter()
                    .filter_map(|m| m.pointer("/metadata/text").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(texts)
    }

    async fn has_data(&self) -> bool {
        match self.post("/describe_index_stats", &json!({})).await {
            Ok(stats) => namespace_count(&stats, &self.namespace) > 0,
            Err(e) => {
                tracing::warn!(error = %e, "could not read remote index stats");
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        let body = json!({ "deleteAll": true, "namespace": self.namespace });
        match self.post("/vectors/delete", &body).await {
            Ok(_) => {
                tracing::info!(namespace = %self.namespace, "remote namespace cleared");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to clear remote namespace");
                false
            }
        }
    }
}

fn with_headers(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
}

async fn read_json(response: reqwest::Response, what: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::IndexUnavailable(format!(
            "{} returned {}: {}",
            what, status, body
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| RagError::IndexUnavailable(format!("{}: {}", what, e)))?;
    if bytes.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| RagError::IndexUnavailable(format!("{}: invalid JSON: {}", what, e)))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn namespace_count(stats: &Value, namespace: &str) -> u64 {
    stats
        .get("namespaces")
        .and_then(|n| n.get(namespace))
        .and_then(|n| n.get("vectorCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// List indexes on the controller, creating ours if absent, and return
/// its data-plane host once it reports ready.
async fn resolve_host(
    client: &reqwest::Client,
    config: &RemoteIndexConfig,
    api_key: &str,
) -> Result<String> {
    let controller = config.controller_url.trim_end_matches('/');

    let list_url = format!("{}/indexes", controller);
    let response = with_headers(client.get(&list_url), api_key)
        .send()
        .await
        .map_err(|e| RagError::IndexUnavailable(format!("list indexes: {}", e)))?;
    let listing = read_json(response, "list indexes").await?;
    let existing = listing
        .get("indexes")
        .and_then(Value::as_array)
        .and_then(|all| {
            all.iter()
                .find(|ix| ix.get("name").and_then(Value::as_str) == Some(config.index_name.as_str()))
        })
        .cloned();

    if let Some(host) = existing
        .as_ref()
        .and_then(|ix| ix.get("host"))
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
    {
        return Ok(host.to_string());
    }

    if existing.is_none() {
        tracing::info!(index = %config.index_name, dimension = config.dimension, "creating remote index");
        let body = json!({
            "name": config.index_name,
            "dimension": config.dimension,
            "metric": config.metric,
            "spec": { "serverless": { "cloud": config.cloud, "region": config.region } },
        });
        let response = with_headers(client.post(&list_url), api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("create index: {}", e)))?;
        read_json(response, "create index").await?;
    }

    let describe_url = format!("{}/indexes/{}", controller, config.index_name);
    for attempt in 0..READY_POLL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let response = with_headers(client.get(&describe_url), api_key)
            .send()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("describe index: {}", e)))?;
        let description = read_json(response, "describe index").await?;
        let ready = description
            .pointer("/status/ready")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if let Some(host) = description.get("host").and_then(Value::as_str) {
            if ready && !host.is_empty() {
                return Ok(host.to_string());
            }
        }
        tracing::debug!(attempt, "waiting for remote index to become ready");
    }

    Err(RagError::IndexUnavailable(format!(
        "index {} did not become ready",
        config.index_name
    )))
}
