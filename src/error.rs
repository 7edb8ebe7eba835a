//! Error taxonomy for the retrieval-augmented generation pipeline.
//!
//! Every fallible core operation returns [`RagError`]. Query-time failures
//! are never converted to apology strings inside the pipeline; the calling
//! surface (CLI or HTTP server) decides how to render them.

use std::path::PathBuf;

/// Errors produced by the chunker, indexes, generator, and orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// A caller supplied an out-of-range parameter (chunk size, empty prompt, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A source document could not be read or parsed.
    #[error("failed to extract text from {}: {source}", path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    /// The embedding index could not be constructed or reached.
    #[error("embedding index unavailable: {0}")]
    IndexUnavailable(String),

    /// A required API credential is not present in the environment.
    #[error("missing credential: environment variable {name} is not set")]
    MissingCredential { name: String },

    /// Stored vectors and the embedding model disagree on dimensionality.
    #[error("dimension mismatch: index has {index} dims, embedder produces {embedder}")]
    DimensionMismatch { index: usize, embedder: usize },

    /// The embedding collaborator failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The language-model call failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Structured output did not satisfy the configured schema.
    #[error("malformed structured response: {reason} (raw: {raw})")]
    MalformedResponse { reason: String, raw: String },

    /// A query arrived before any successful ingestion.
    #[error("documents have not been processed yet")]
    NotReady,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a `.docx` archive could not be turned into text.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid OOXML archive: {0}")]
    Archive(String),

    #[error("malformed document XML: {0}")]
    Xml(String),
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
