//! Embedding index abstraction.
//!
//! The [`EmbeddingIndex`] trait is the single capability the orchestrator
//! talks to. Two backends implement it:
//!
//! | Backend | Storage | Metric | Readiness source |
//! |---------|---------|--------|------------------|
//! | [`FlatIndex`] | in-memory vectors + two files on disk | L2 | [`Readiness::Flag`] |
//! | [`RemoteIndex`] | hosted vector store, one namespace | cosine | [`Readiness::Live`] |
//!
//! Which one is built is decided by `index.backend` in configuration
//! (see [`build_index`]), never by branching inside the orchestrator.

pub mod flat;
pub mod remote;

pub use flat::FlatIndex;
pub use remote::RemoteIndex;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, IndexBackend};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Where the orchestrator's readiness answer comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// An explicit flag, seeded from persisted state at startup and
    /// updated by ingest/clear.
    Flag,
    /// Ask the index ([`EmbeddingIndex::has_data`]) on every check.
    Live,
}

/// Stores chunk vectors alongside their source text and answers
/// nearest-neighbour queries.
///
/// Concurrent `search` calls are fine. Concurrent `add` calls against the
/// same store are not coordinated here; callers serialize ingestion.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Short backend label for logs and status output.
    fn name(&self) -> &str;

    fn readiness(&self) -> Readiness;

    /// True when `add` performs its own splitting and should receive whole
    /// document texts rather than pre-chunked windows.
    fn splits_internally(&self) -> bool {
        false
    }

    /// Embed and store `texts`. Returns the number of records written.
    async fn add(&self, texts: &[String]) -> Result<usize>;

    /// Return the texts of up to `k` records nearest to `query`, closest first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>>;

    /// Whether the store currently holds any records. Errors read as `false`.
    async fn has_data(&self) -> bool;

    /// Delete every record. Reports success instead of raising.
    async fn clear(&self) -> bool;
}

/// Build the backend selected by `index.backend`.
pub async fn build_index(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn EmbeddingIndex>> {
    match config.index.backend {
        IndexBackend::Local => {
            let local = &config.index.local;
            let index = FlatIndex::open(&local.vector_path, &local.texts_path, embedder)?;
            Ok(Arc::new(index))
        }
        IndexBackend::Remote => {
            let remote = config.index.remote.as_ref().ok_or_else(|| {
                RagError::IndexUnavailable("[index.remote] is not configured".to_string())
            })?;
            let index = RemoteIndex::connect(remote, embedder).await?;
            Ok(Arc::new(index))
        }
    }
}
