//! Local flat (brute-force) L2 index with write-through persistence.
//!
//! Two artifacts are kept positionally aligned:
//!
//! - a vector blob: header + `count × dims` little-endian `f32`
//! - a JSON array of the source texts
//!
//! ```text
//! offset  size  field
//! 0       4     magic "DBFI"
//! 4       4     format version (u32 LE)
//! 8       4     dims (u32 LE)
//! 12      8     count (u64 LE)
//! 20      32    SHA-256 of the texts artifact written alongside
//! 52      ...   vectors
//! ```
//!
//! Every `add` rewrites both files in full. Each file is replaced through a
//! temp file and rename, so neither is ever torn on its own, but a crash
//! between the two renames leaves them out of step. That window is
//! detected on load (count or digest mismatch is logged) and both arrays
//! are cut back to their aligned prefix in memory, so the next `add`
//! persists a consistent pair.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{EmbeddingIndex, Readiness};
use crate::embedding::{blob_to_vec, l2_distance_sq, vec_to_blob, EmbeddingProvider};
use crate::error::{RagError, Result};

const MAGIC: &[u8; 4] = b"DBFI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 32;

struct FlatState {
    dims: usize,
    /// Row-major, `len() == count * dims`.
    vectors: Vec<f32>,
    texts: Vec<String>,
}

impl FlatState {
    fn count(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.vectors.len() / self.dims
        }
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dims..(i + 1) * self.dims]
    }
}

/// In-memory L2 index mirrored to a vector blob and a texts file.
pub struct FlatIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_path: PathBuf,
    texts_path: PathBuf,
    state: RwLock<FlatState>,
}

impl FlatIndex {
    /// Load both artifacts if present, otherwise start empty.
    ///
    /// Fails with [`RagError::DimensionMismatch`] when the stored vectors
    /// were produced by a model of a different dimensionality, and with
    /// [`RagError::IndexUnavailable`] when the blob is unreadable.
    pub fn open(
        vector_path: &Path,
        texts_path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        for path in [vector_path, texts_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let dims = embedder.dims();
        let texts_bytes = match std::fs::read(texts_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let texts: Vec<String> = match &texts_bytes {
            Some(bytes) => serde_json::from_slice(bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %texts_path.display(), error = %e, "unreadable texts artifact, starting with no texts");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let state = if vector_path.exists() {
            tracing::info!(path = %vector_path.display(), "loading vector store");
            let blob = std::fs::read(vector_path)?;
            let (stored_dims, digest, vectors) = decode_blob(&blob).map_err(|reason| {
                RagError::IndexUnavailable(format!("{}: {}", vector_path.display(), reason))
            })?;
            if stored_dims != dims {
                return Err(RagError::DimensionMismatch {
                    index: stored_dims,
                    embedder: dims,
                });
            }
            let mut state = FlatState {
                dims,
                vectors,
                texts,
            };
            let texts_digest = texts_bytes.as_deref().map(sha256).unwrap_or([0u8; 32]);
            if state.count() != state.texts.len() || texts_digest != digest {
                let aligned = state.count().min(state.texts.len());
                tracing::warn!(
                    vectors = state.count(),
                    texts = state.texts.len(),
                    kept = aligned,
                    "vector blob and texts artifact are out of sync; keeping the aligned prefix"
                );
                // Appends must land at the same position in both arrays.
                state.vectors.truncate(aligned * dims);
                state.texts.truncate(aligned);
            }
            state
        } else {
            tracing::info!(dims, "creating vector store");
            FlatState {
                dims,
                vectors: Vec::new(),
                texts: Vec::new(),
            }
        };

        Ok(Self {
            embedder,
            vector_path: vector_path.to_path_buf(),
            texts_path: texts_path.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.read().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored texts in insertion order.
    pub fn texts(&self) -> Vec<String> {
        self.read().texts.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, FlatState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, FlatState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &FlatState) -> Result<()> {
        let texts_json = serde_json::to_vec_pretty(&state.texts)?;
        let digest = sha256(&texts_json);
        write_replace(&self.texts_path, &texts_json)?;
        write_replace(&self.vector_path, &encode_blob(state, &digest))?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingIndex for FlatIndex {
    fn name(&self) -> &str {
        "flat"
    }

    fn readiness(&self) -> Readiness {
        Readiness::Flag
    }

    async fn add(&self, texts: &[String]) -> Result<usize> {
        if texts.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = texts.len(), "creating embeddings");
        let embeddings = self.embedder.embed(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let mut state = self.write();
        if let Some(bad) = embeddings.iter().find(|v| v.len() != state.dims) {
            return Err(RagError::DimensionMismatch {
                index: state.dims,
                embedder: bad.len(),
            });
        }

        let prev_vectors = state.vectors.len();
        let prev_texts = state.texts.len();
        for v in &embeddings {
            state.vectors.extend_from_slice(v);
        }
        state.texts.extend(texts.iter().cloned());

        if let Err(e) = self.persist(&state) {
            state.vectors.truncate(prev_vectors);
            state.texts.truncate(prev_texts);
            return Err(e);
        }

        tracing::info!(
            added = texts.len(),
            total = state.count(),
            vectors = %self.vector_path.display(),
            texts = %self.texts_path.display(),
            "vector store saved"
        );
        Ok(texts.len())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        if self.is_empty() {
            tracing::debug!("vector store is empty");
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query).await?;

        let state = self.read();
        let count = state.count();
        if count == 0 {
            return Ok(Vec::new());
        }
        if query_vec.len() != state.dims {
            return Err(RagError::DimensionMismatch {
                index: state.dims,
                embedder: query_vec.len(),
            });
        }

        let k = k.max(1).min(count);
        let mut scored: Vec<(f32, usize)> = (0..count)
            .map(|i| (l2_distance_sq(&query_vec, state.row(i)), i))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        let results: Vec<String> = scored
            .into_iter()
            .filter_map(|(_, i)| state.texts.get(i).cloned())
            .collect();
        tracing::debug!(query, results = results.len(), "flat search");
        Ok(results)
    }

    async fn has_data(&self) -> bool {
        !self.is_empty()
    }

    async fn clear(&self) -> bool {
        let mut state = self.write();
        for path in [&self.vector_path, &self.texts_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to remove index artifact");
                    return false;
                }
            }
        }
        state.vectors.clear();
        state.texts.clear();
        tracing::info!("flat index cleared");
        true
    }
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Write `bytes` next to `path` and rename over it.
fn write_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

fn encode_blob(state: &FlatState, texts_digest: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + state.vectors.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(state.dims as u32).to_le_bytes());
    out.extend_from_slice(&(state.count() as u64).to_le_bytes());
    out.extend_from_slice(texts_digest);
    out.extend_from_slice(&vec_to_blob(&state.vectors));
    out
}

/// Returns `(dims, texts_digest, vectors)`.
fn decode_blob(blob: &[u8]) -> std::result::Result<(usize, [u8; 32], Vec<f32>), String> {
    if blob.len() < HEADER_LEN || &blob[0..4] != MAGIC {
        return Err("not a vector blob".to_string());
    }
    let version = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", version));
    }
    let dims = u32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&blob[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&blob[20..HEADER_LEN]);

    let body = &blob[HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "header overflow".to_string())?;
    if body.len() != expected {
        return Err(format!(
            "truncated: expected {} vector bytes, found {}",
            expected,
            body.len()
        ));
    }
    Ok((dims, digest, blob_to_vec(body)))
}
