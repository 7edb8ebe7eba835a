//! The question-answering orchestrator.
//!
//! [`ChatBot`] owns the pipeline lifecycle:
//!
//! ```text
//! ingest:  docs dir → extract → chunk → index.add
//! answer:  ready? → retrieve → build prompt → generate
//! ```
//!
//! # Readiness
//!
//! The index decides where readiness comes from
//! ([`EmbeddingIndex::readiness`]). A [`Readiness::Flag`] backend gets an
//! explicit flag, seeded from `has_data()` once at construction and flipped
//! by ingest and clear. A [`Readiness::Live`] backend is asked on every
//! check. Either way, `answer` on a not-ready bot returns
//! [`RagError::NotReady`] without touching the index or the model.
//!
//! # Concurrency
//!
//! Queries may run concurrently. Ingestion is not serialized here; the
//! caller runs at most one ingestion at a time (the HTTP server holds a
//! mutex for this).

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::{chunk_text, ChunkParams};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::{RagError, Result};
use crate::extract::extract_file;
use crate::generate::AnswerGenerator;
use crate::index::{build_index, EmbeddingIndex, Readiness};
use crate::models::{ChatRequest, ChatResponse, Document, IngestResult};
use crate::prompt::PromptBuilder;
use crate::retriever::Retriever;

/// Lock files Word leaves next to open documents.
const LOCK_FILE_PREFIX: &str = "~$";

/// Non-collaborator knobs for [`ChatBot`].
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub chunking: ChunkParams,
    pub top_k: usize,
    pub include_globs: Vec<String>,
    /// Default response contract when a request does not choose one.
    pub structured: bool,
}

impl BotSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            chunking: ChunkParams::new(config.chunking.chunk_size, config.chunking.overlap)?,
            top_k: config.retrieval.top_k,
            include_globs: config.docs.include_globs.clone(),
            structured: config.generation.structured,
        })
    }
}

pub struct ChatBot {
    index: Arc<dyn EmbeddingIndex>,
    retriever: Retriever,
    prompts: PromptBuilder,
    generator: AnswerGenerator,
    settings: BotSettings,
    include: GlobSet,
    ready: AtomicBool,
}

impl ChatBot {
    pub async fn new(
        index: Arc<dyn EmbeddingIndex>,
        generator: AnswerGenerator,
        prompts: PromptBuilder,
        settings: BotSettings,
    ) -> Result<Self> {
        let include = build_globset(&settings.include_globs)?;
        let ready = match index.readiness() {
            Readiness::Flag => index.has_data().await,
            Readiness::Live => false,
        };
        tracing::info!(index = index.name(), ready, "chat bot initialized");
        Ok(Self {
            retriever: Retriever::new(index.clone(), settings.top_k),
            index,
            prompts,
            generator,
            settings,
            include,
            ready: AtomicBool::new(ready),
        })
    }

    /// Build every collaborator from configuration. Missing credentials and
    /// unusable storage fail here, before any request is served.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding).context("embedding provider")?;
        let index = build_index(config, embedder)
            .await
            .context("embedding index")?;
        let generator = AnswerGenerator::from_config(&config.generation).context("generator")?;
        let prompts = PromptBuilder::from_config(&config.prompt).context("prompt templates")?;
        let settings = BotSettings::from_config(config)?;
        Ok(Self::new(index, generator, prompts, settings).await?)
    }

    pub fn index(&self) -> &Arc<dyn EmbeddingIndex> {
        &self.index
    }

    pub async fn is_ready(&self) -> bool {
        match self.index.readiness() {
            Readiness::Flag => self.ready.load(Ordering::SeqCst),
            Readiness::Live => self.index.has_data().await,
        }
    }

    /// Ingest every matching document under `dir`.
    ///
    /// A missing directory or an empty document set is reported through
    /// [`IngestResult`], not as an error. Documents that fail extraction are
    /// logged and skipped.
    pub async fn ingest(&self, dir: &Path) -> Result<IngestResult> {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "document directory not found");
            return Ok(IngestResult::failed("directory not found", 0));
        }

        let paths = self.find_documents(dir);
        if paths.is_empty() {
            tracing::warn!(dir = %dir.display(), "no documents found");
            return Ok(IngestResult::failed("no documents found", 0));
        }

        let mut docs = Vec::with_capacity(paths.len());
        let mut skipped = 0;
        for path in paths {
            tracing::info!(path = %path.display(), "processing document");
            match extract_file(&path) {
                Ok(text) => docs.push(Document::new(path, text)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping document");
                    skipped += 1;
                }
            }
        }

        let mut result = self.ingest_documents(docs).await?;
        result.skipped += skipped;
        Ok(result)
    }

    /// Hand already-extracted documents to the index.
    pub async fn ingest_documents(&self, docs: Vec<Document>) -> Result<IngestResult> {
        let total = docs.len();
        let texts: Vec<String> = docs
            .into_iter()
            .filter(|d| !d.text.trim().is_empty())
            .map(|d| d.text)
            .collect();
        let empty = total - texts.len();
        if texts.is_empty() {
            return Ok(IngestResult::failed("no documents found", empty));
        }

        let records = if self.index.splits_internally() {
            self.index.add(&texts).await?
        } else {
            let chunks: Vec<String> = texts
                .iter()
                .flat_map(|t| chunk_text(t, &self.settings.chunking))
                .collect();
            tracing::info!(chunks = chunks.len(), "chunked documents");
            self.index.add(&chunks).await?
        };

        let success = records > 0;
        if success {
            self.ready.store(true, Ordering::SeqCst);
        }
        tracing::info!(documents = texts.len(), records, "ingestion finished");
        Ok(IngestResult {
            success,
            reason: if success {
                "documents processed".to_string()
            } else {
                "no records were indexed".to_string()
            },
            documents: texts.len(),
            skipped: empty,
            records,
        })
    }

    /// Answer one question.
    pub async fn answer(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let query = request.message.trim();
        if query.is_empty() {
            return Err(RagError::InvalidArgument("message must not be empty".to_string()));
        }
        if !self.is_ready().await {
            return Err(RagError::NotReady);
        }

        let chunks = self.retriever.retrieve(query, None).await?;
        let prompt = self.prompts.build(query, &chunks, &request.hints);
        tracing::debug!(chunks = chunks.len(), prompt_len = prompt.len(), "prompt built");

        if request.structured.unwrap_or(self.settings.structured) {
            Ok(ChatResponse::Structured(
                self.generator.generate_structured(&prompt).await?,
            ))
        } else {
            Ok(ChatResponse::Text(self.generator.generate_text(&prompt).await?))
        }
    }

    /// Delete every indexed record. Readiness drops only if the index
    /// reports success.
    pub async fn clear(&self) -> bool {
        let cleared = self.index.clear().await;
        if cleared {
            self.ready.store(false, Ordering::SeqCst);
        }
        cleared
    }

    /// Files directly under `dir`; subdirectories are not scanned.
    fn find_documents(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                !e.file_name()
                    .to_string_lossy()
                    .starts_with(LOCK_FILE_PREFIX)
            })
            .filter(|e| {
                let rel = e.path().strip_prefix(dir).unwrap_or(e.path());
                self.include.is_match(rel)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();
        paths
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RagError::InvalidArgument(format!("invalid include glob {:?}: {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::InvalidArgument(format!("include globs: {}", e)))
}
