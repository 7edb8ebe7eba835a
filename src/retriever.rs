//! Top-k context retrieval over an [`EmbeddingIndex`].

use std::sync::Arc;

use crate::error::Result;
use crate::index::EmbeddingIndex;

pub const DEFAULT_TOP_K: usize = 3;

/// Fetches the chunks most relevant to a query.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn EmbeddingIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<dyn EmbeddingIndex>, top_k: usize) -> Self {
        Self {
            index,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Return up to `top_k` chunk texts (or the configured default), closest first.
    ///
    /// An empty index yields an empty list, not an error.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<String>> {
        let k = top_k.unwrap_or(self.top_k).max(1);
        let chunks = self.index.search(query, k).await?;
        tracing::debug!(k, found = chunks.len(), "retrieved context");
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Readiness;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the `k` it was asked for and returns that many canned texts.
    struct CountingIndex {
        asked: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingIndex for CountingIndex {
        fn name(&self) -> &str {
            "counting"
        }
        fn readiness(&self) -> Readiness {
            Readiness::Flag
        }
        async fn add(&self, texts: &[String]) -> Result<usize> {
            Ok(texts.len())
        }
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<String>> {
            self.asked.lock().unwrap().push(k);
            Ok((0..k).map(|i| format!("chunk {}", i)).collect())
        }
        async fn has_data(&self) -> bool {
            true
        }
        async fn clear(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn uses_default_and_override() {
        let index = Arc::new(CountingIndex {
            asked: Mutex::new(Vec::new()),
        });
        let retriever = Retriever::new(index.clone(), DEFAULT_TOP_K);

        assert_eq!(retriever.retrieve("q", None).await.unwrap().len(), 3);
        assert_eq!(retriever.retrieve("q", Some(1)).await.unwrap(), vec!["chunk 0"]);
        retriever.retrieve("q", Some(0)).await.unwrap();

        assert_eq!(*index.asked.lock().unwrap(), vec![3, 1, 1]);
    }
}
